//! RILSA movement taxonomy for a four-access intersection.
//!
//! Access indices are fixed: N=1, S=2, O=3, E=4. Every valid code is a turn
//! kind applied to an origin access:
//!
//! ```text
//! Direct      1 N->S   2 S->N   3 O->E   4 E->O
//! Left        5 N->O   6 S->E   7 O->S   8 E->N
//! Right    9(1) N->E 9(2) S->O 9(3) O->N 9(4) E->S
//! U-turn  10(i) back to the origin access
//! Walk     P(i) pedestrian leaving from access i
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cardinal {
    N,
    S,
    O,
    E,
}

impl Cardinal {
    pub const ALL: [Cardinal; 4] = [Cardinal::N, Cardinal::S, Cardinal::O, Cardinal::E];

    /// RILSA access index, 1-based.
    #[inline]
    pub fn index(&self) -> u8 {
        match self {
            Cardinal::N => 1,
            Cardinal::S => 2,
            Cardinal::O => 3,
            Cardinal::E => 4,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Cardinal::N),
            2 => Some(Cardinal::S),
            3 => Some(Cardinal::O),
            4 => Some(Cardinal::E),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Cardinal::N => Cardinal::S,
            Cardinal::S => Cardinal::N,
            Cardinal::O => Cardinal::E,
            Cardinal::E => Cardinal::O,
        }
    }

    /// Exit reached by a left turn from this access.
    pub fn left(&self) -> Self {
        match self {
            Cardinal::N => Cardinal::O,
            Cardinal::S => Cardinal::E,
            Cardinal::O => Cardinal::S,
            Cardinal::E => Cardinal::N,
        }
    }

    /// Exit reached by a right turn from this access.
    pub fn right(&self) -> Self {
        self.left().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinal::N => "N",
            Cardinal::S => "S",
            Cardinal::O => "O",
            Cardinal::E => "E",
        }
    }
}

impl fmt::Display for Cardinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TurnKind {
    Direct,
    Left,
    Right,
    UTurn,
    Pedestrian,
}

impl TurnKind {
    /// Vehicular turn kind implied by an origin/destination pair.
    pub fn between(origin: Cardinal, destination: Cardinal) -> Self {
        if origin == destination {
            TurnKind::UTurn
        } else if destination == origin.opposite() {
            TurnKind::Direct
        } else if destination == origin.left() {
            TurnKind::Left
        } else {
            TurnKind::Right
        }
    }
}

/// A well-formed RILSA code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MovementCode {
    kind: TurnKind,
    origin: Cardinal,
}

impl MovementCode {
    #[inline]
    pub fn new(kind: TurnKind, origin: Cardinal) -> Self {
        Self { kind, origin }
    }

    #[inline]
    pub fn kind(&self) -> TurnKind {
        self.kind
    }

    #[inline]
    pub fn origin(&self) -> Cardinal {
        self.origin
    }

    #[inline]
    pub fn is_pedestrian(&self) -> bool {
        self.kind == TurnKind::Pedestrian
    }

    /// Destination the code implies, `None` for pedestrians.
    pub fn destination(&self) -> Option<Cardinal> {
        match self.kind {
            TurnKind::Direct => Some(self.origin.opposite()),
            TurnKind::Left => Some(self.origin.left()),
            TurnKind::Right => Some(self.origin.right()),
            TurnKind::UTurn => Some(self.origin),
            TurnKind::Pedestrian => None,
        }
    }

    pub fn label(&self) -> RilsaLabel {
        let i = self.origin.index();

        match self.kind {
            TurnKind::Direct => RilsaLabel::numbered(i, None),
            TurnKind::Left => RilsaLabel::numbered(4 + i, None),
            TurnKind::Right => RilsaLabel::numbered(9, Some(i)),
            TurnKind::UTurn => RilsaLabel::numbered(10, Some(i)),
            TurnKind::Pedestrian => RilsaLabel::pedestrian(Some(i)),
        }
    }

    /// All twenty codes in report order.
    pub fn all() -> Vec<MovementCode> {
        [
            TurnKind::Direct,
            TurnKind::Left,
            TurnKind::Right,
            TurnKind::UTurn,
            TurnKind::Pedestrian,
        ]
        .into_iter()
        .flat_map(|kind| Cardinal::ALL.into_iter().map(move |o| MovementCode::new(kind, o)))
        .collect()
    }
}

impl fmt::Display for MovementCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.label(), f)
    }
}

impl FromStr for MovementCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label: RilsaLabel = s.parse()?;
        label
            .to_code()
            .ok_or_else(|| format!("`{}` is not a complete RILSA code", s))
    }
}

impl Serialize for MovementCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MovementCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeFamily {
    Numbered(u8),
    Pedestrian,
}

/// A possibly malformed code, as emitted by the classifier or supplied from
/// outside (`"5"`, `"9(2)"`, `"P(1)"`, or broken ones such as `"9"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RilsaLabel {
    pub family: CodeFamily,
    pub index: Option<u8>,
}

impl RilsaLabel {
    #[inline]
    pub fn numbered(number: u8, index: Option<u8>) -> Self {
        Self {
            family: CodeFamily::Numbered(number),
            index,
        }
    }

    #[inline]
    pub fn pedestrian(index: Option<u8>) -> Self {
        Self {
            family: CodeFamily::Pedestrian,
            index,
        }
    }

    /// Whether the family requires an access index (9, 10 and P).
    pub fn needs_index(&self) -> bool {
        matches!(
            self.family,
            CodeFamily::Pedestrian | CodeFamily::Numbered(9) | CodeFamily::Numbered(10)
        )
    }

    /// Turn kind of the family, `None` for numbers outside 1..=10.
    pub fn kind(&self) -> Option<TurnKind> {
        match self.family {
            CodeFamily::Numbered(1..=4) => Some(TurnKind::Direct),
            CodeFamily::Numbered(5..=8) => Some(TurnKind::Left),
            CodeFamily::Numbered(9) => Some(TurnKind::Right),
            CodeFamily::Numbered(10) => Some(TurnKind::UTurn),
            CodeFamily::Numbered(_) => None,
            CodeFamily::Pedestrian => Some(TurnKind::Pedestrian),
        }
    }

    /// Origin access the label encodes.
    pub fn origin(&self) -> Option<Cardinal> {
        match self.family {
            CodeFamily::Numbered(n @ 1..=4) => Cardinal::from_index(n),
            CodeFamily::Numbered(n @ 5..=8) => Cardinal::from_index(n - 4),
            _ => self.index.and_then(Cardinal::from_index),
        }
    }

    pub fn to_code(&self) -> Option<MovementCode> {
        if self.needs_index() != self.index.is_some() {
            return None;
        }

        Some(MovementCode::new(self.kind()?, self.origin()?))
    }
}

impl fmt::Display for RilsaLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            CodeFamily::Numbered(n) => write!(f, "{}", n)?,
            CodeFamily::Pedestrian => f.write_str("P")?,
        }

        if let Some(i) = self.index {
            write!(f, "({})", i)?;
        }

        Ok(())
    }
}

impl FromStr for RilsaLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, index) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| format!("unbalanced index in `{}`", s))?;
                let index = inner
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| format!("bad index in `{}`", s))?;

                (&s[..open], Some(index))
            }
            None => (s, None),
        };

        let head = head.trim();
        if head.eq_ignore_ascii_case("p") {
            return Ok(RilsaLabel::pedestrian(index));
        }

        // `P3` shorthand
        if let Some(rest) = head.strip_prefix('P').or_else(|| head.strip_prefix('p')) {
            if index.is_none() {
                let index = rest
                    .parse::<u8>()
                    .map_err(|_| format!("bad pedestrian code `{}`", s))?;
                return Ok(RilsaLabel::pedestrian(Some(index)));
            }
        }

        let number = head
            .parse::<u8>()
            .map_err(|_| format!("bad movement number in `{}`", s))?;

        Ok(RilsaLabel::numbered(number, index))
    }
}
