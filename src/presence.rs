//! Per-peer presence and cursor/selection tracking. Reacts to both local
//! and remote operations, keeping every peer's cursor transformed into the
//! current document's coordinate space, and emits decoration deltas for
//! the host editor to render.
use crate::operation::Operation;
use crate::protocol::{CursorData, PeerId, UserInfo};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A remote peer's identity and current cursor/selection state, in
/// codepoint indices.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub info: UserInfo,
    pub cursor: CursorData,
}

/// One decoration to render for a peer: a caret at a single position, or a
/// highlighted range for a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoration {
    Caret { peer: PeerId, hue: u16, at: u64 },
    Selection { peer: PeerId, hue: u16, start: u64, end: u64 },
}

/// Tracks every remote peer's presence info and cursor state, excluding
/// `me`. Owns the lazily-injected per-hue style cache (§4.D, §9).
#[derive(Debug, Default)]
pub struct PresenceTracker {
    peers: HashMap<PeerId, PeerRecord>,
    seen_hues: HashSet<u16>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> &HashMap<PeerId, PeerRecord> {
        &self.peers
    }

    /// Called on a `UserInfo` message: insert or update a peer's identity.
    pub fn upsert_info(&mut self, id: PeerId, info: UserInfo) {
        self.peers
            .entry(id)
            .and_modify(|p| p.info = info.clone())
            .or_insert_with(|| PeerRecord {
                info,
                cursor: CursorData::default(),
            });
    }

    /// Called on a `UserDisconnect` message.
    pub fn remove(&mut self, id: PeerId) {
        self.peers.remove(&id);
    }

    /// Called on reconnect: the server will re-announce all peers.
    pub fn clear(&mut self) {
        self.peers.clear();
    }

    /// Called on a `UserCursor` message: overwrite the peer's cursor state
    /// verbatim (it already arrives in the server's current coordinate
    /// space, so no transform is applied here).
    pub fn set_cursor(&mut self, id: PeerId, data: CursorData) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.cursor = data;
        } else {
            debug!(peer = id, "cursor update for unknown peer, ignoring");
        }
    }

    /// Transforms every tracked peer's cursor/selection endpoints through
    /// `op`, called after any operation (local or remote) is applied to the
    /// document.
    pub fn transform_cursors(&mut self, op: &Operation) {
        for peer in self.peers.values_mut() {
            for cursor in &mut peer.cursor.cursors {
                *cursor = op.transform_index(*cursor);
            }
            for (start, end) in &mut peer.cursor.selections {
                *start = op.transform_index(*start);
                *end = op.transform_index(*end);
            }
        }
    }

    /// Renders the current presence state into a list of decorations, one
    /// caret per cursor and one range per selection, styled by each peer's
    /// hue. Registers any newly observed hue with `on_new_hue` exactly
    /// once — the equivalent of lazily injecting a CSS rule in a browser
    /// host.
    pub fn decorations(&mut self, mut on_new_hue: impl FnMut(u16)) -> Vec<Decoration> {
        let mut decorations = Vec::new();
        for (&id, peer) in &self.peers {
            if self.seen_hues.insert(peer.info.hue) {
                on_new_hue(peer.info.hue);
            }
            for &at in &peer.cursor.cursors {
                decorations.push(Decoration::Caret {
                    peer: id,
                    hue: peer.info.hue,
                    at,
                });
            }
            for &(start, end) in &peer.cursor.selections {
                decorations.push(Decoration::Selection {
                    peer: id,
                    hue: peer.info.hue,
                    start,
                    end,
                });
            }
        }
        decorations
    }
}
