//! Structured prompt text.
//!
//! A rendered prompt is not a plain string: role markers and end-of-turn
//! signals must reach the tokenizer as atomic special tokens, never as
//! ordinary text that happens to spell the same characters. `PromptText`
//! keeps the two apart as an ordered sequence of [`PromptPiece`]s, so the
//! tokenizer collaborator can tokenize literal pieces generically and resolve
//! marker pieces to reserved tokens.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ChatFormatError;

/// Marker name resolved by the tokenizer to the beginning-of-sequence token.
pub const BOS: &str = "BOS";
/// Marker name resolved by the tokenizer to the end-of-sequence token.
pub const EOS: &str = "EOS";
/// Marker name resolved by the tokenizer to the end-of-turn token.
pub const EOT: &str = "EOT";

/// One piece of a prompt: literal content or a special marker.
///
/// A marker is either one of the reserved names ([`BOS`], [`EOS`], [`EOT`])
/// or arbitrary model-defined token-text (e.g. `<|from|>assistant\n`) that
/// must be tokenized with special tokens enabled and never re-split as
/// ordinary text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPiece {
    /// Plain content, safe to re-tokenize as ordinary text.
    Text(String),
    /// A model-specific control construct, compared by identity.
    Marker(String),
}

impl Serialize for PromptPiece {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Marker(value) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "marker")?;
                map.serialize_entry("value", value)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for PromptPiece {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PieceVisitor;

        impl<'de> Visitor<'de> for PieceVisitor {
            type Value = PromptPiece;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a string or a {\"type\": \"marker\", \"value\": …} object")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(PromptPiece::Text(value.to_owned()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
                Ok(PromptPiece::Text(value))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut kind: Option<String> = None;
                let mut value: Option<String> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "type" => kind = Some(map.next_value()?),
                        "value" => value = Some(map.next_value()?),
                        other => return Err(de::Error::unknown_field(other, &["type", "value"])),
                    }
                }

                let kind = kind.ok_or_else(|| de::Error::missing_field("type"))?;
                if kind != "marker" {
                    return Err(de::Error::custom(format!(
                        "unknown prompt piece type \"{kind}\""
                    )));
                }
                let value = value.ok_or_else(|| de::Error::missing_field("value"))?;
                Ok(PromptPiece::Marker(value))
            }
        }

        deserializer.deserialize_any(PieceVisitor)
    }
}

/// An immutable, ordered sequence of [`PromptPiece`]s.
///
/// Always stored flattened and normalized: adjacent literal pieces are
/// merged, empty literals are dropped, and markers are never coalesced
/// (merging would corrupt reserved names like [`BOS`]). Because of that,
/// equality of two prompt texts is element-wise equality of their piece
/// sequences, and flattening is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PromptText {
    pieces: Vec<PromptPiece>,
}

impl PromptText {
    /// An empty prompt text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A prompt text made of a single literal piece.
    pub fn text(text: impl Into<String>) -> Self {
        let mut out = Self::new();
        out.push_piece(PromptPiece::Text(text.into()));
        out
    }

    /// A prompt text made of a single marker piece.
    pub fn marker(value: impl Into<String>) -> Self {
        let mut out = Self::new();
        out.push_piece(PromptPiece::Marker(value.into()));
        out
    }

    /// The beginning-of-sequence marker.
    #[must_use]
    pub fn bos() -> Self {
        Self::marker(BOS)
    }

    /// The end-of-sequence marker.
    #[must_use]
    pub fn eos() -> Self {
        Self::marker(EOS)
    }

    /// The end-of-turn marker.
    #[must_use]
    pub fn eot() -> Self {
        Self::marker(EOT)
    }

    /// Builds a normalized prompt text from raw pieces.
    #[must_use]
    pub fn from_pieces(pieces: Vec<PromptPiece>) -> Self {
        let mut out = Self::new();
        for piece in pieces {
            out.push_piece(piece);
        }
        out
    }

    /// Concatenates values in order, flattening them into one sequence.
    ///
    /// Nested values never stay nested: the result is a flat, normalized
    /// piece list, and concatenating the result again is a no-op
    /// (flattening is idempotent and order-preserving).
    pub fn concat<I>(values: I) -> Self
    where
        I: IntoIterator<Item = PromptText>,
    {
        let mut out = Self::new();
        for value in values {
            out.append(value);
        }
        out
    }

    /// Interleaves `separator` between `values`.
    ///
    /// Empty items are not skipped: they produce adjacent separators, so
    /// callers that want them omitted must pre-filter.
    pub fn join<I>(separator: &PromptText, values: I) -> Self
    where
        I: IntoIterator<Item = PromptText>,
    {
        let mut out = Self::new();
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                out.append(separator.clone());
            }
            out.append(value);
        }
        out
    }

    /// Appends another prompt text, keeping the sequence normalized.
    pub fn append(&mut self, other: PromptText) {
        for piece in other.pieces {
            self.push_piece(piece);
        }
    }

    fn push_piece(&mut self, piece: PromptPiece) {
        match piece {
            PromptPiece::Text(text) if text.is_empty() => {}
            PromptPiece::Text(text) => {
                if let Some(PromptPiece::Text(last)) = self.pieces.last_mut() {
                    last.push_str(&text);
                } else {
                    self.pieces.push(PromptPiece::Text(text));
                }
            }
            marker @ PromptPiece::Marker(_) => self.pieces.push(marker),
        }
    }

    /// The flattened piece sequence.
    #[must_use]
    pub fn pieces(&self) -> &[PromptPiece] {
        &self.pieces
    }

    /// Whether this prompt text contains no pieces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// The plain literal content, if this value contains no markers.
    ///
    /// Returns `None` as soon as a marker is present; marker-bearing
    /// triggers must be matched by token identity, not by spelling.
    #[must_use]
    pub fn as_literal(&self) -> Option<&str> {
        match self.pieces.as_slice() {
            [] => Some(""),
            [PromptPiece::Text(text)] => Some(text),
            _ => None,
        }
    }

    /// Trailing match: whether `suffix` ends this prompt text.
    ///
    /// Markers are compared by identity. The earliest piece of `suffix`, when
    /// literal, may match a string-suffix of the aligned literal piece; every
    /// later piece must match exactly.
    #[must_use]
    pub fn ends_with(&self, suffix: &PromptText) -> bool {
        if suffix.pieces.is_empty() {
            return true;
        }
        if suffix.pieces.len() > self.pieces.len() {
            return false;
        }

        let offset = self.pieces.len() - suffix.pieces.len();
        for (index, piece) in suffix.pieces.iter().enumerate() {
            let own = &self.pieces[offset + index];
            let matches = match (own, piece) {
                (PromptPiece::Text(own_text), PromptPiece::Text(suffix_text)) if index == 0 => {
                    own_text.ends_with(suffix_text)
                }
                _ => own == piece,
            };
            if !matches {
                return false;
            }
        }
        true
    }

    /// Serializes to the stable, order-preserving JSON array form.
    pub fn to_json(&self) -> Result<serde_json::Value, ChatFormatError> {
        serde_json::to_value(self).map_err(|e| ChatFormatError::InvalidSerializedForm(e.to_string()))
    }

    /// Parses the JSON array form produced by [`PromptText::to_json`].
    ///
    /// Values failing the shape contract are rejected with a descriptive
    /// error, never coerced.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ChatFormatError> {
        serde_json::from_value(value).map_err(|e| ChatFormatError::InvalidSerializedForm(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for PromptText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pieces = Vec::<PromptPiece>::deserialize(deserializer)?;
        Ok(Self::from_pieces(pieces))
    }
}

impl From<&str> for PromptText {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for PromptText {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Diagnostic text view: literal pieces verbatim, markers as their raw value.
///
/// This is for logs and debugging only. Tokenization must go through
/// [`PromptText::pieces`] so markers keep their identity.
impl fmt::Display for PromptText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for piece in &self.pieces {
            match piece {
                PromptPiece::Text(text) | PromptPiece::Marker(text) => f.write_str(text)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PromptText {
        PromptText::concat([
            PromptText::bos(),
            PromptText::text("hello "),
            PromptText::marker("<|stop|>"),
            PromptText::text("world"),
        ])
    }

    #[test]
    fn test_adjacent_literals_merge() {
        let text = PromptText::concat([PromptText::text("a"), PromptText::text("b")]);
        assert_eq!(text, PromptText::text("ab"));
        assert_eq!(text.pieces().len(), 1);
    }

    #[test]
    fn test_empty_literals_dropped() {
        let text = PromptText::concat([
            PromptText::text(""),
            PromptText::marker("<|stop|>"),
            PromptText::text(""),
        ]);
        assert_eq!(text, PromptText::marker("<|stop|>"));
    }

    #[test]
    fn test_markers_never_coalesce() {
        let text = PromptText::concat([PromptText::bos(), PromptText::eot()]);
        assert_eq!(
            text.pieces(),
            &[
                PromptPiece::Marker(BOS.to_owned()),
                PromptPiece::Marker(EOT.to_owned())
            ]
        );
    }

    #[test]
    fn test_flattening_is_idempotent() {
        let once = sample();
        let twice = PromptText::concat([once.clone()]);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_join_keeps_separators_around_empty_items() {
        let sep = PromptText::text("\n");
        let joined = PromptText::join(
            &sep,
            [PromptText::text("a"), PromptText::new(), PromptText::text("b")],
        );
        assert_eq!(joined, PromptText::text("a\n\nb"));
    }

    #[test]
    fn test_json_round_trip() {
        let text = sample();
        let json = text.to_json().unwrap();
        let parsed = PromptText::from_json(json).unwrap();
        assert_eq!(parsed, text);
    }

    #[test]
    fn test_json_form_is_tagged_array() {
        let json = PromptText::concat([PromptText::text("hi"), PromptText::marker("<|stop|>")])
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!(["hi", {"type": "marker", "value": "<|stop|>"}])
        );
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(PromptText::from_json(serde_json::json!({"not": "an array"})).is_err());
        assert!(PromptText::from_json(serde_json::json!([42])).is_err());
        assert!(PromptText::from_json(serde_json::json!([{"type": "other", "value": "x"}])).is_err());
        assert!(PromptText::from_json(serde_json::json!([{"type": "marker"}])).is_err());
    }

    #[test]
    fn test_ends_with_literal_suffix() {
        let generated = PromptText::text("done.<|stop|>");
        assert!(generated.ends_with(&PromptText::text("<|stop|>")));
        assert!(!PromptText::text("done.<|stop|>x").ends_with(&PromptText::text("<|stop|>")));
    }

    #[test]
    fn test_ends_with_marker_identity() {
        let generated = PromptText::concat([PromptText::text("done."), PromptText::eot()]);
        assert!(generated.ends_with(&PromptText::eot()));
        // A marker trigger never matches its textual spelling.
        assert!(!PromptText::text("done.EOT").ends_with(&PromptText::eot()));
    }

    #[test]
    fn test_ends_with_mixed_suffix() {
        let generated = PromptText::concat([
            PromptText::text("some answer"),
            PromptText::marker("<|stop|>"),
            PromptText::text("trailing"),
        ]);
        let suffix = PromptText::concat([
            PromptText::text("answer"),
            PromptText::marker("<|stop|>"),
            PromptText::text("trailing"),
        ]);
        assert!(generated.ends_with(&suffix));
        // Only the earliest suffix piece may match partially; later pieces
        // must match exactly.
        let not_suffix = PromptText::concat([
            PromptText::marker("<|stop|>"),
            PromptText::text("ailing"),
        ]);
        assert!(!generated.ends_with(&not_suffix));
    }

    #[test]
    fn test_as_literal() {
        assert_eq!(PromptText::text("abc").as_literal(), Some("abc"));
        assert_eq!(PromptText::new().as_literal(), Some(""));
        assert_eq!(PromptText::eos().as_literal(), None);
    }
}
