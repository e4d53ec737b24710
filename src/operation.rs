//! Immutable edit representation and the operational-transformation algebra
//! (compose, transform, apply) used to reconcile concurrent edits.
#![allow(dead_code)]
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// A single primitive action within an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Retain(u64),
    Insert(String),
    Delete(u64),
}

/// An ordered sequence of [`Action`]s describing a transformation of one
/// string into another. Adjacent actions of the same kind are merged at
/// append time, so an `Operation` is always in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Operation {
    actions: Vec<Action>,
    base_len: u64,
    target_len: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpError {
    #[error("operation length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_len(&self) -> u64 {
        self.base_len
    }

    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(|a| matches!(a, Action::Retain(_)))
    }

    /// Appends a retain, merging with a trailing retain if present.
    pub fn retain(&mut self, n: u64) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        self.target_len += n;
        if let Some(Action::Retain(last)) = self.actions.last_mut() {
            *last += n;
        } else {
            self.actions.push(Action::Retain(n));
        }
        self
    }

    /// Appends an insert, merging with a trailing insert if present.
    ///
    /// Inserts are kept before a trailing delete, matching the canonical
    /// ordering `insert, delete` at any given position — this is what lets
    /// `transform`'s tie-break rule be expressed purely by argument order.
    pub fn insert(&mut self, s: &str) -> &mut Self {
        if s.is_empty() {
            return self;
        }
        self.target_len += s.chars().count() as u64;
        match self.actions.last_mut() {
            Some(Action::Insert(last)) => {
                last.push_str(s);
            }
            Some(Action::Delete(_)) => {
                // Keep insert before delete: find the delete and splice before it.
                let delete = self.actions.pop().expect("checked above");
                match self.actions.last_mut() {
                    Some(Action::Insert(last)) => last.push_str(s),
                    _ => self.actions.push(Action::Insert(s.to_string())),
                }
                self.actions.push(delete);
            }
            _ => self.actions.push(Action::Insert(s.to_string())),
        }
        self
    }

    /// Appends a delete, merging with a trailing delete if present.
    pub fn delete(&mut self, n: u64) -> &mut Self {
        if n == 0 {
            return self;
        }
        self.base_len += n;
        if let Some(Action::Delete(last)) = self.actions.last_mut() {
            *last += n;
        } else {
            self.actions.push(Action::Delete(n));
        }
        self
    }

    /// Applies this operation to `s`, returning the resulting string.
    pub fn apply(&self, s: &str) -> Result<String, OpError> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() as u64 != self.base_len {
            return Err(OpError::LengthMismatch {
                expected: self.base_len,
                actual: chars.len() as u64,
            });
        }
        let mut result = String::with_capacity(self.target_len as usize);
        let mut pos = 0usize;
        for action in &self.actions {
            match action {
                Action::Retain(n) => {
                    let n = *n as usize;
                    result.extend(&chars[pos..pos + n]);
                    pos += n;
                }
                Action::Insert(s) => result.push_str(s),
                Action::Delete(n) => pos += *n as usize,
            }
        }
        Ok(result)
    }

    /// Maps a codepoint index through this operation.
    pub fn transform_index(&self, index: u64) -> u64 {
        let mut pos = 0u64;
        let mut result = index;
        for action in &self.actions {
            match action {
                Action::Retain(n) => pos += n,
                Action::Insert(s) => {
                    // An insert at or before the index shifts it forward.
                    if pos <= index {
                        result += s.chars().count() as u64;
                    }
                }
                Action::Delete(n) => {
                    if pos < index {
                        let deleted_before_index = (*n).min(index - pos);
                        result = result.saturating_sub(deleted_before_index);
                    }
                    pos += n;
                }
            }
        }
        result
    }

    /// Composes `a` then `b` into a single operation, `a∘b`.
    pub fn compose(a: &Operation, b: &Operation) -> Result<Operation, OpError> {
        if a.target_len != b.base_len {
            return Err(OpError::LengthMismatch {
                expected: a.target_len,
                actual: b.base_len,
            });
        }
        let mut result = Operation::new();
        let mut ai = a.actions.iter().cloned().peekable();
        let mut bi = b.actions.iter().cloned().peekable();
        let mut a_next = ai.next();
        let mut b_next = bi.next();

        loop {
            match (a_next.take(), b_next.take()) {
                (None, None) => break,
                (Some(Action::Delete(n)), bn) => {
                    result.delete(n);
                    a_next = ai.next();
                    b_next = bn;
                }
                (an, Some(Action::Insert(s))) => {
                    result.insert(&s);
                    a_next = an;
                    b_next = bi.next();
                }
                (None, Some(op)) | (Some(op), None) => {
                    unreachable!("mismatched operation lengths should have errored: {op:?}")
                }
                (Some(Action::Retain(an)), Some(Action::Retain(bn))) => {
                    match an.cmp(&bn) {
                        std::cmp::Ordering::Less => {
                            result.retain(an);
                            a_next = ai.next();
                            b_next = Some(Action::Retain(bn - an));
                        }
                        std::cmp::Ordering::Greater => {
                            result.retain(bn);
                            a_next = Some(Action::Retain(an - bn));
                            b_next = bi.next();
                        }
                        std::cmp::Ordering::Equal => {
                            result.retain(an);
                            a_next = ai.next();
                            b_next = bi.next();
                        }
                    }
                }
                (Some(Action::Retain(an)), Some(Action::Delete(bn))) => match an.cmp(&bn) {
                    std::cmp::Ordering::Less => {
                        result.delete(an);
                        a_next = ai.next();
                        b_next = Some(Action::Delete(bn - an));
                    }
                    std::cmp::Ordering::Greater => {
                        result.delete(bn);
                        a_next = Some(Action::Retain(an - bn));
                        b_next = bi.next();
                    }
                    std::cmp::Ordering::Equal => {
                        result.delete(bn);
                        a_next = ai.next();
                        b_next = bi.next();
                    }
                },
                (Some(Action::Insert(s)), Some(Action::Retain(bn))) => {
                    let len = s.chars().count() as u64;
                    match len.cmp(&bn) {
                        std::cmp::Ordering::Less => {
                            result.insert(&s);
                            a_next = ai.next();
                            b_next = Some(Action::Retain(bn - len));
                        }
                        std::cmp::Ordering::Greater => {
                            let (head, tail) = split_str(&s, bn);
                            result.insert(head);
                            a_next = Some(Action::Insert(tail.to_string()));
                            b_next = bi.next();
                        }
                        std::cmp::Ordering::Equal => {
                            result.insert(&s);
                            a_next = ai.next();
                            b_next = bi.next();
                        }
                    }
                }
                (Some(Action::Insert(s)), Some(Action::Delete(bn))) => {
                    let len = s.chars().count() as u64;
                    match len.cmp(&bn) {
                        std::cmp::Ordering::Less => {
                            a_next = ai.next();
                            b_next = Some(Action::Delete(bn - len));
                        }
                        std::cmp::Ordering::Greater => {
                            let (_, tail) = split_str(&s, bn);
                            a_next = Some(Action::Insert(tail.to_string()));
                            b_next = bi.next();
                        }
                        std::cmp::Ordering::Equal => {
                            a_next = ai.next();
                            b_next = bi.next();
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// Transforms `a` and `b`, which must share a `base_len`, producing
    /// `(a', b')` such that `a ∘ b' ≡ b ∘ a'`.
    ///
    /// Concurrent inserts at the same position tie-break towards `a`: `a`'s
    /// text ends up first in the converged result.
    pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation), OpError> {
        if a.base_len != b.base_len {
            return Err(OpError::LengthMismatch {
                expected: a.base_len,
                actual: b.base_len,
            });
        }
        let mut a_prime = Operation::new();
        let mut b_prime = Operation::new();
        let mut ai = a.actions.iter().cloned();
        let mut bi = b.actions.iter().cloned();
        let mut a_next = ai.next();
        let mut b_next = bi.next();

        loop {
            match (a_next.take(), b_next.take()) {
                (None, None) => break,
                (Some(Action::Insert(s)), bn) => {
                    // a's insert comes first: a' emits it, b' retains over it.
                    a_prime.insert(&s);
                    b_prime.retain(s.chars().count() as u64);
                    a_next = ai.next();
                    b_next = bn;
                }
                (an, Some(Action::Insert(s))) => {
                    a_prime.retain(s.chars().count() as u64);
                    b_prime.insert(&s);
                    a_next = an;
                    b_next = bi.next();
                }
                (None, Some(op)) | (Some(op), None) => {
                    unreachable!("mismatched base lengths should have errored: {op:?}")
                }
                (Some(Action::Retain(an)), Some(Action::Retain(bn))) => {
                    let min = an.min(bn);
                    a_prime.retain(min);
                    b_prime.retain(min);
                    a_next = remainder(Action::Retain(an), min, &mut ai);
                    b_next = remainder(Action::Retain(bn), min, &mut bi);
                }
                (Some(Action::Retain(an)), Some(Action::Delete(bn))) => {
                    let min = an.min(bn);
                    b_prime.delete(min);
                    a_next = remainder(Action::Retain(an), min, &mut ai);
                    b_next = remainder(Action::Delete(bn), min, &mut bi);
                }
                (Some(Action::Delete(an)), Some(Action::Retain(bn))) => {
                    let min = an.min(bn);
                    a_prime.delete(min);
                    a_next = remainder(Action::Delete(an), min, &mut ai);
                    b_next = remainder(Action::Retain(bn), min, &mut bi);
                }
                (Some(Action::Delete(an)), Some(Action::Delete(bn))) => {
                    let min = an.min(bn);
                    a_next = remainder(Action::Delete(an), min, &mut ai);
                    b_next = remainder(Action::Delete(bn), min, &mut bi);
                }
            }
        }
        Ok((a_prime, b_prime))
    }
}

/// Returns `Some` with the unconsumed remainder of `action` (of length
/// `action_len - consumed`) if any remains, otherwise pulls the next action
/// from `rest`.
fn remainder(
    action: Action,
    consumed: u64,
    rest: &mut impl Iterator<Item = Action>,
) -> Option<Action> {
    let len = match &action {
        Action::Retain(n) | Action::Delete(n) => *n,
        Action::Insert(_) => unreachable!("inserts are consumed whole"),
    };
    if len > consumed {
        let remaining = len - consumed;
        Some(match action {
            Action::Retain(_) => Action::Retain(remaining),
            Action::Delete(_) => Action::Delete(remaining),
            Action::Insert(_) => unreachable!(),
        })
    } else {
        rest.next()
    }
}

fn split_str(s: &str, at: u64) -> (&str, &str) {
    let byte_idx = s
        .char_indices()
        .nth(at as usize)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(byte_idx)
}

impl Serialize for Operation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.actions.len()))?;
        for action in &self.actions {
            match action {
                Action::Retain(n) => seq.serialize_element(&(*n as i64))?,
                Action::Delete(n) => seq.serialize_element(&(-(*n as i64)))?,
                Action::Insert(s) => seq.serialize_element(s)?,
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OpVisitor;

        impl<'de> Visitor<'de> for OpVisitor {
            type Value = Operation;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of positive ints (retain), negative ints (delete), or strings (insert)")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut op = Operation::new();
                while let Some(element) = seq.next_element::<OpElement>()? {
                    match element {
                        OpElement::Number(n) if n >= 0 => {
                            op.retain(n as u64);
                        }
                        OpElement::Number(n) => {
                            op.delete((-n) as u64);
                        }
                        OpElement::Text(s) => {
                            if s.is_empty() {
                                return Err(de::Error::custom("insert action must not be empty"));
                            }
                            op.insert(&s);
                        }
                    }
                }
                Ok(op)
            }
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OpElement {
            Number(i64),
            Text(String),
        }

        deserializer.deserialize_seq(OpVisitor)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn compose_associativity(s in "[a-zA-Z]{0,8}") {
            let base_len = s.chars().count() as u64;
            let a = {
                let mut op = Operation::new();
                op.retain(base_len);
                op.insert("A");
                op
            };
            let b = {
                let mut op = Operation::new();
                op.retain(base_len);
                op.insert("B");
                op
            };
            let c = {
                let mut op = Operation::new();
                op.retain(base_len + 2);
                op.insert("C");
                op
            };
            let ab = Operation::compose(&a, &b).unwrap();
            let left = Operation::compose(&ab, &c).unwrap().apply(&s).unwrap();
            let bc = Operation::compose(&b, &c).unwrap();
            let right = Operation::compose(&a, &bc).unwrap().apply(&s).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn transform_convergence(s in "[a-zA-Z]{0,8}") {
            let base_len = s.chars().count() as u64;
            let a = {
                let mut op = Operation::new();
                op.retain(base_len);
                op.insert("A");
                op
            };
            let b = {
                let mut op = Operation::new();
                op.retain(base_len);
                op.insert("B");
                op
            };
            let (a_prime, b_prime) = Operation::transform(&a, &b).unwrap();
            let left = Operation::compose(&a, &b_prime).unwrap().apply(&s).unwrap();
            let right = Operation::compose(&b, &a_prime).unwrap().apply(&s).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn transform_index_is_monotone(i in 0u64..20, j in 0u64..20) {
            let mut op = Operation::new();
            op.retain(5);
            op.insert("hello");
            op.delete(3);
            op.retain(20);
            let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
            prop_assert!(op.transform_index(lo) <= op.transform_index(hi));
        }
    }
}
