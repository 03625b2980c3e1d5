//! Value kinds and the quote-depth kind-byte encoding
//!
//! A cell's header byte packs the fundamental kind together with up to three
//! levels of quoting:
//!
//! ```text
//! byte = kind + 64 * depth        (kind < 64, depth in 0..=3)
//! ```
//!
//! so quoting a value up to three deep is pure arithmetic on the byte with no
//! allocation. Depth four and beyond moves the value out into a shared
//! pairing (see [`crate::value::quote`]).

/// Maximum quote depth representable in the kind byte itself
pub const MAX_INLINE_QUOTE_DEPTH: u8 = 3;

/// The fundamental value kinds
///
/// Discriminants must stay below 64 so the kind byte has room for the
/// quote-depth multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Blank = 1,
    Logic = 2,
    Integer = 3,
    Word = 4,
    SetWord = 5,
    GetWord = 6,
    Path = 7,
    Tuple = 8,
    Block = 9,
    Group = 10,
    Text = 11,
    Binary = 12,
    Object = 13,
    Frame = 14,
    Action = 15,
    Error = 16,
    Handle = 17,
    /// Meta-kind reported for any quoted value; also the stored kind of a
    /// cell whose quoting overflowed into a pairing
    Quoted = 18,
}

impl Kind {
    /// Decode a kind from the low six bits of a kind byte
    pub fn from_byte(byte: u8) -> Option<Kind> {
        match byte % 64 {
            1 => Some(Kind::Blank),
            2 => Some(Kind::Logic),
            3 => Some(Kind::Integer),
            4 => Some(Kind::Word),
            5 => Some(Kind::SetWord),
            6 => Some(Kind::GetWord),
            7 => Some(Kind::Path),
            8 => Some(Kind::Tuple),
            9 => Some(Kind::Block),
            10 => Some(Kind::Group),
            11 => Some(Kind::Text),
            12 => Some(Kind::Binary),
            13 => Some(Kind::Object),
            14 => Some(Kind::Frame),
            15 => Some(Kind::Action),
            16 => Some(Kind::Error),
            17 => Some(Kind::Handle),
            18 => Some(Kind::Quoted),
            _ => None,
        }
    }

    /// Is this one of the word kinds
    pub fn is_word(self) -> bool {
        matches!(self, Kind::Word | Kind::SetWord | Kind::GetWord)
    }

    /// Is this one of the array kinds (element storage is cells)
    pub fn is_array(self) -> bool {
        matches!(self, Kind::Block | Kind::Group | Kind::Path | Kind::Tuple)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Blank => "blank",
            Kind::Logic => "logic",
            Kind::Integer => "integer",
            Kind::Word => "word",
            Kind::SetWord => "set-word",
            Kind::GetWord => "get-word",
            Kind::Path => "path",
            Kind::Tuple => "tuple",
            Kind::Block => "block",
            Kind::Group => "group",
            Kind::Text => "text",
            Kind::Binary => "binary",
            Kind::Object => "object",
            Kind::Frame => "frame",
            Kind::Action => "action",
            Kind::Error => "error",
            Kind::Handle => "handle",
            Kind::Quoted => "quoted",
        }
    }
}

/// A set of acceptable kinds for a parameter, plus the pseudo-constraints
/// that look at a value's shape rather than its kind alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSet(u64);

impl TypeSet {
    /// Accepts nothing (a parameter that can only be specialized in)
    pub const NONE: TypeSet = TypeSet(0);

    /// Accepts every ordinary kind
    pub const ANY: TypeSet = TypeSet((1 << 62) - 1);

    const REFINEMENT_PATH_BIT: u64 = 1 << 62;
    const PREDICATE_TUPLE_BIT: u64 = 1 << 63;

    /// Pseudo-constraint: a path shaped like a refinement (`/word`)
    pub const REFINEMENT_PATH: TypeSet = TypeSet(Self::REFINEMENT_PATH_BIT);

    /// Pseudo-constraint: a tuple shaped like a predicate (`.word`)
    pub const PREDICATE_TUPLE: TypeSet = TypeSet(Self::PREDICATE_TUPLE_BIT);

    pub const fn just(kind: Kind) -> TypeSet {
        TypeSet(1 << (kind as u8))
    }

    pub const fn or(self, other: TypeSet) -> TypeSet {
        TypeSet(self.0 | other.0)
    }

    pub const fn and_kind(self, kind: Kind) -> TypeSet {
        TypeSet(self.0 | (1 << (kind as u8)))
    }

    pub fn contains(self, kind: Kind) -> bool {
        self.0 & (1 << (kind as u8)) != 0
    }

    pub fn wants_refinement_path(self) -> bool {
        self.0 & Self::REFINEMENT_PATH_BIT != 0
    }

    pub fn wants_predicate_tuple(self) -> bool {
        self.0 & Self::PREDICATE_TUPLE_BIT != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}
