//! The OT client state machine (§4.C): the revision counter, the
//! outstanding/buffer reconciliation against server history, local-change
//! capture, and remote-operation application back into the editor.
use crate::codepoint::{codepoint_len, codepoint_to_utf16, utf16_to_codepoint};
use crate::editor::{ChangeEvent, EditRange, Editor};
use crate::error::ProtocolError;
use crate::operation::{Action, Operation};
use crate::presence::PresenceTracker;
use crate::protocol::{ClientMessage, CursorData, OperationWithId, PeerId, SetMetaPayload, UserInfo, Visibility};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Owns the document model, the unacked-operation buffers, and the
/// presence tracker. Every method here is synchronous: all I/O is
/// fire-and-forget through `outgoing`, consumed by the connection manager.
pub struct ClientState<E: Editor> {
    editor: E,
    presence: PresenceTracker,
    outgoing: UnboundedSender<ClientMessage>,

    revision: u32,
    outstanding: Option<Operation>,
    buffer: Option<Operation>,
    me: Option<PeerId>,
    last_value: String,
    ignore_changes: bool,

    connected: bool,
    stored_info: Option<UserInfo>,
}

impl<E: Editor> ClientState<E> {
    pub fn new(editor: E, outgoing: UnboundedSender<ClientMessage>) -> Self {
        let last_value = editor.get_value();
        Self {
            editor,
            presence: PresenceTracker::new(),
            outgoing,
            revision: 0,
            outstanding: None,
            buffer: None,
            me: None,
            last_value,
            ignore_changes: false,
            connected: false,
            stored_info: None,
        }
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut E {
        &mut self.editor
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceTracker {
        &mut self.presence
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn outstanding(&self) -> Option<&Operation> {
        self.outstanding.as_ref()
    }

    pub fn buffer(&self) -> Option<&Operation> {
        self.buffer.as_ref()
    }

    pub fn me(&self) -> Option<PeerId> {
        self.me
    }

    pub fn stored_info(&self) -> Option<&UserInfo> {
        self.stored_info.as_ref()
    }

    /// Has unsynchronized local work the server hasn't acknowledged yet.
    /// Mirrors the `beforeunload` guard (§4.E, §7.5): a host exiting with
    /// this true would lose local edits.
    pub fn has_unacked_work(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Called once, when the server assigns our identity.
    pub fn set_identity(&mut self, id: PeerId) {
        self.me = Some(id);
    }

    /// Called on reconnect, before re-announcing anything: the server will
    /// re-send every peer, so drop our stale view.
    pub fn clear_peers(&mut self) {
        self.presence.clear();
    }

    /// Re-sends whatever is in flight. Called by the connection manager on
    /// socket (re)open.
    pub fn resend_outstanding(&self) {
        if let Some(op) = &self.outstanding {
            self.send_edit(op);
        }
    }

    fn send(&self, message: ClientMessage) {
        // Fire-and-forget: the connection manager drops messages while the
        // socket is closed. Correctness does not depend on this channel
        // replaying anything — `outstanding` is explicitly re-sent on
        // reconnect instead (§4.E).
        let _ = self.outgoing.send(message);
    }

    fn send_edit(&self, op: &Operation) {
        self.send(ClientMessage::Edit {
            revision: self.revision,
            operation: op.clone(),
        });
    }

    /// §4.C `set_info`: stores the local user's display info and sends it
    /// immediately if connected.
    pub fn set_info(&mut self, info: UserInfo) {
        self.stored_info = Some(info.clone());
        if self.connected {
            self.send(ClientMessage::ClientInfo {
                name: info.name,
                hue: info.hue,
            });
        }
    }

    /// §4.C `set_meta`: enqueues a non-OT message, returning whether the
    /// socket is currently open.
    pub fn set_meta(&mut self, language: Option<String>, visibility: Option<Visibility>) -> bool {
        if self.connected {
            self.send(ClientMessage::SetMeta(SetMetaPayload {
                language,
                visibility,
            }));
        }
        self.connected
    }

    /// §4.D local-cursor suppression: a move is only sent while there is no
    /// buffered local edit still unseen by the server. Returns whether the
    /// cursor data was actually sent.
    pub fn send_cursor_if_allowed(&mut self, data: CursorData) -> bool {
        if self.connected && self.buffer.is_none() {
            self.send(ClientMessage::CursorData(data));
            true
        } else {
            false
        }
    }

    /// §4.C `on_local_change`: captures a host editor change event into a
    /// single `Operation` and routes it through `apply_client`.
    pub fn on_local_change(&mut self, event: &ChangeEvent) {
        if self.ignore_changes || event.ranges.is_empty() {
            return;
        }

        // Ranges are processed in descending utf16_offset order so each
        // one's offsets stay valid against the unmodified `last_value`
        // snapshot, per §4.C.
        let mut ranges = event.ranges.clone();
        ranges.sort_by(|a, b| b.utf16_offset.cmp(&a.utf16_offset));

        let base = self.last_value.clone();
        let base_len = codepoint_len(&base);
        let mut spans: Vec<(u64, u64, String)> = ranges
            .into_iter()
            .map(|range| {
                let start_cp = utf16_to_codepoint(&base, range.utf16_offset);
                let end_cp = utf16_to_codepoint(&base, range.utf16_offset + range.utf16_length);
                (start_cp, end_cp, range.text)
            })
            .collect();
        // All spans are read from the same immutable snapshot, so sorting
        // by position is safe regardless of the iteration order above.
        spans.sort_by_key(|(start, ..)| *start);

        let mut op = Operation::new();
        let mut pos = 0u64;
        for (start_cp, end_cp, text) in spans {
            op.retain(start_cp - pos);
            op.delete(end_cp - start_cp);
            op.insert(&text);
            pos = end_cp;
        }
        op.retain(base_len - pos);

        self.last_value = self.editor.get_value();
        self.apply_client(op);
    }

    /// §4.C `apply_client`: folds a locally produced operation into
    /// outstanding/buffer, sending it immediately if nothing else is in
    /// flight.
    pub fn apply_client(&mut self, op: Operation) {
        match (self.outstanding.take(), self.buffer.take()) {
            (None, _) => {
                self.outstanding = Some(op.clone());
                self.send_edit(&op);
            }
            (Some(out), None) => {
                self.outstanding = Some(out);
                self.buffer = Some(op);
            }
            (Some(out), Some(buf)) => {
                self.outstanding = Some(out);
                match Operation::compose(&buf, &op) {
                    Ok(composed) => self.buffer = Some(composed),
                    Err(err) => {
                        warn!(%err, "failed to compose local operation into buffer");
                        self.buffer = Some(buf);
                    }
                }
            }
        }
        self.presence.transform_cursors(&op);
    }

    /// §4.C `apply_server`: transforms a remote operation through our
    /// unacked local work, applies the result to the editor, and
    /// transforms remote peer cursors through it.
    pub fn apply_server(&mut self, op: Operation) -> Result<(), ProtocolError> {
        let mut op = op;

        if let Some(outstanding) = self.outstanding.take() {
            let (new_outstanding, new_op) = Operation::transform(&outstanding, &op)
                .map_err(|_| ProtocolError::Desynchronized)?;
            op = new_op;

            if let Some(buffer) = self.buffer.take() {
                let (new_buffer, new_op) =
                    Operation::transform(&buffer, &op).map_err(|_| ProtocolError::Desynchronized)?;
                op = new_op;
                self.buffer = Some(new_buffer);
            }
            self.outstanding = Some(new_outstanding);
        }

        self.ignore_changes = true;
        let ranges = operation_to_edit_ranges(&op, &self.last_value);
        self.editor.push_edit(&ranges);
        self.ignore_changes = false;

        self.last_value = self.editor.get_value();
        self.presence.transform_cursors(&op);
        debug!(revision = self.revision, "applied remote operation");
        Ok(())
    }

    /// §4.C `server_ack`: invoked when a `History` entry's id equals `me`.
    pub fn server_ack(&mut self) {
        if self.outstanding.is_none() {
            warn!("received server ack with no outstanding operation, ignoring");
            return;
        }
        self.outstanding = self.buffer.take();
        if let Some(op) = &self.outstanding {
            self.send_edit(op);
        }
    }

    /// Processes one `History` message (§4.C). `start` is the server
    /// revision of the first included operation; entries already covered
    /// by our local `revision` are skipped. Returns a `HistoryGap` error
    /// (which the connection manager treats as fatal, closing the socket)
    /// if the server's history starts after our local revision.
    pub fn receive_history(
        &mut self,
        start: u32,
        operations: Vec<OperationWithId>,
    ) -> Result<(), ProtocolError> {
        if start > self.revision {
            return Err(ProtocolError::HistoryGap {
                local_revision: self.revision,
                server_start: start,
            });
        }
        let skip = (self.revision - start) as usize;
        for entry in operations.into_iter().skip(skip) {
            self.revision += 1;
            if Some(entry.id) == self.me {
                self.server_ack();
            } else {
                self.apply_server(entry.operation)?;
            }
        }
        Ok(())
    }
}

/// Converts an operation's Insert/Delete actions into UTF-16 edit ranges
/// against `base`, so the editor's `push_edit` can apply it (§4.C, §4.B).
fn operation_to_edit_ranges(op: &Operation, base: &str) -> Vec<EditRange> {
    let mut ranges = Vec::new();
    let mut pos_cp = 0u64;
    for action in op.actions() {
        match action {
            Action::Retain(n) => pos_cp += n,
            Action::Insert(s) => {
                let utf16_offset = codepoint_to_utf16(base, pos_cp);
                ranges.push(EditRange {
                    utf16_offset,
                    utf16_length: 0,
                    text: s.clone(),
                });
            }
            Action::Delete(n) => {
                let utf16_start = codepoint_to_utf16(base, pos_cp);
                let utf16_end = codepoint_to_utf16(base, pos_cp + n);
                ranges.push(EditRange {
                    utf16_offset: utf16_start,
                    utf16_length: utf16_end - utf16_start,
                    text: String::new(),
                });
                pos_cp += n;
            }
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::PlainTextEditor;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn harness(initial: &str) -> (ClientState<PlainTextEditor>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = ClientState::new(PlainTextEditor::new(initial), tx);
        state.set_connected(true);
        state.set_identity(0);
        (state, rx)
    }

    /// Applies an insert to the editor first, then reports it to the
    /// client, mirroring how a real host editor calls back after the user
    /// types (`src/bin/cli.rs`'s `handle_command` does the same).
    fn local_insert(state: &mut ClientState<PlainTextEditor>, utf16_offset: u64, text: &str) {
        let range = EditRange {
            utf16_offset,
            utf16_length: 0,
            text: text.to_string(),
        };
        state.editor_mut().push_edit(&[range.clone()]);
        state.on_local_change(&ChangeEvent { ranges: vec![range] });
    }

    fn op_insert(at: u64, s: &str) -> Operation {
        let mut op = Operation::new();
        op.retain(at);
        op.insert(s);
        op
    }

    fn ack(id: PeerId, op: Operation) -> OperationWithId {
        OperationWithId { id, operation: op }
    }

    #[test]
    fn s1_local_ack_round_trip() {
        let (mut state, mut rx) = harness("");
        local_insert(&mut state, 0, "hi");

        let sent = rx.try_recv().unwrap();
        assert_eq!(
            sent,
            ClientMessage::Edit {
                revision: 0,
                operation: op_insert(0, "hi"),
            }
        );
        assert_eq!(state.outstanding(), Some(&op_insert(0, "hi")));
        assert_eq!(state.buffer(), None);

        state
            .receive_history(0, vec![ack(0, op_insert(0, "hi"))])
            .unwrap();

        assert_eq!(state.revision(), 1);
        assert_eq!(state.outstanding(), None);
        assert_eq!(state.buffer(), None);
        assert_eq!(state.editor().get_value(), "hi");
    }

    #[test]
    fn s2_concurrent_remote_insert_during_in_flight() {
        let (mut state, mut rx) = harness("abc");
        local_insert(&mut state, 1, "X");

        let mut expected_out = Operation::new();
        expected_out.retain(1);
        expected_out.insert("X");
        expected_out.retain(2);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::Edit {
                revision: 0,
                operation: expected_out.clone(),
            }
        );
        assert_eq!(state.outstanding(), Some(&expected_out));

        // Other peer appended "Y" at the end of the original "abc".
        let remote = op_insert(3, "Y");
        state.receive_history(0, vec![ack(1, remote)]).unwrap();

        assert_eq!(state.editor().get_value(), "aXbcY");
        let mut expected_outstanding = Operation::new();
        expected_outstanding.retain(1);
        expected_outstanding.insert("X");
        expected_outstanding.retain(3);
        assert_eq!(state.outstanding(), Some(&expected_outstanding));

        state
            .receive_history(1, vec![ack(0, expected_outstanding)])
            .unwrap();

        assert_eq!(state.revision(), 2);
        assert_eq!(state.outstanding(), None);
        assert_eq!(state.buffer(), None);
        assert_eq!(state.editor().get_value(), "aXbcY");
    }

    #[test]
    fn s3_buffering_while_in_flight() {
        let (mut state, mut rx) = harness("");
        local_insert(&mut state, 0, "a");
        let _ = rx.try_recv().unwrap();
        assert_eq!(state.outstanding(), Some(&op_insert(0, "a")));

        local_insert(&mut state, 1, "b");
        assert!(rx.try_recv().is_err(), "buffered edit must not be sent yet");
        assert_eq!(state.buffer(), Some(&op_insert(1, "b")));

        state.receive_history(0, vec![ack(0, op_insert(0, "a"))]).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::Edit {
                revision: 1,
                operation: op_insert(1, "b"),
            }
        );
        assert_eq!(state.outstanding(), Some(&op_insert(1, "b")));
        assert_eq!(state.buffer(), None);

        state.receive_history(1, vec![ack(0, op_insert(1, "b"))]).unwrap();
        assert_eq!(state.outstanding(), None);
        assert_eq!(state.editor().get_value(), "ab");
    }

    #[test]
    fn s4_astral_codepoint_offset() {
        let (mut state, mut rx) = harness("😀");
        // utf16 offset 2 is right after the astral character (1 codepoint, 2 units).
        local_insert(&mut state, 2, "!");
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::Edit {
                revision: 0,
                operation: op_insert(1, "!"),
            }
        );
    }

    #[test]
    fn s5_history_gap_is_fatal_and_does_not_advance_state() {
        let (mut state, _rx) = harness("abc");
        state.revision = 3;
        let err = state.receive_history(5, vec![]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::HistoryGap {
                local_revision: 3,
                server_start: 5,
            }
        );
        assert_eq!(state.revision(), 3);
    }

    #[test]
    fn s8_cursor_suppressed_while_buffered_then_allowed_after_ack() {
        let (mut state, mut rx) = harness("");
        local_insert(&mut state, 0, "a");
        let _ = rx.try_recv().unwrap();
        local_insert(&mut state, 1, "b");
        assert!(state.buffer().is_some());

        let data = CursorData {
            cursors: vec![2],
            selections: vec![],
        };
        assert!(!state.send_cursor_if_allowed(data.clone()));
        assert!(rx.try_recv().is_err());

        state.receive_history(0, vec![ack(0, op_insert(0, "a"))]).unwrap();
        let _ = rx.try_recv().unwrap(); // the re-sent buffer as outstanding
        state.receive_history(1, vec![ack(0, op_insert(1, "b"))]).unwrap();
        assert!(state.buffer().is_none());

        assert!(state.send_cursor_if_allowed(data.clone()));
        assert_eq!(rx.try_recv().unwrap(), ClientMessage::CursorData(data));
    }

    #[test]
    fn server_ack_with_no_outstanding_is_ignored() {
        let (mut state, _rx) = harness("");
        state.server_ack();
        assert_eq!(state.outstanding(), None);
    }

    #[test]
    fn set_info_sends_only_when_connected() {
        let (mut state, mut rx) = harness("");
        state.set_connected(false);
        state.set_info(UserInfo {
            name: "alice".into(),
            hue: 10,
        });
        assert!(rx.try_recv().is_err());
        assert_eq!(state.stored_info().unwrap().name, "alice");

        state.set_connected(true);
        state.set_info(UserInfo {
            name: "alice".into(),
            hue: 10,
        });
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn has_unacked_work_tracks_outstanding() {
        let (mut state, _rx) = harness("");
        assert!(!state.has_unacked_work());
        local_insert(&mut state, 0, "a");
        assert!(state.has_unacked_work());
    }
}
