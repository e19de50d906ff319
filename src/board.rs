// src/board.rs
// Board-level value types: squares, occupants, the 8x8 occupancy grid and holding slots.

use core::fmt;

/// Number of files (and ranks) on the playing surface.
pub const BOARD_SIZE: u8 = 8;

/// One of the 64 playing squares, addressed by zero-based file and rank.
///
/// File 0 is the a-file, rank 0 is White's back rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Returns `None` when either coordinate is outside `0..8`.
    pub const fn new(file: u8, rank: u8) -> Option<Self> {
        if file < BOARD_SIZE && rank < BOARD_SIZE {
            Some(Self { file, rank })
        } else {
            None
        }
    }

    pub const fn file(self) -> u8 {
        self.file
    }

    pub const fn rank(self) -> u8 {
        self.rank
    }

    /// Parses the two-character algebraic form, e.g. `b"e2"`.
    pub fn from_algebraic(text: &[u8]) -> Option<Self> {
        match text {
            [f @ b'a'..=b'h', r @ b'1'..=b'8'] => Self::new(f - b'a', r - b'1'),
            _ => None,
        }
    }

    /// Iterates a1, b1, ..., h1, a2, ... h8.
    pub fn all() -> impl Iterator<Item = Square> {
        (0..BOARD_SIZE).flat_map(|rank| (0..BOARD_SIZE).map(move |file| Square { file, rank }))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

/// What sits on a square. Only colour is tracked; piece identity is the command
/// source's business.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Occupant {
    #[default]
    Empty,
    WhitePiece,
    BlackPiece,
}

impl Occupant {
    pub fn is_empty(self) -> bool {
        self == Occupant::Empty
    }

    /// True for a white/black pair, false if either side is empty.
    pub fn is_enemy_of(self, other: Occupant) -> bool {
        matches!(
            (self, other),
            (Occupant::WhitePiece, Occupant::BlackPiece) | (Occupant::BlackPiece, Occupant::WhitePiece)
        )
    }

    /// The two ranks this colour starts on.
    pub fn home_ranks(self) -> Option<[u8; 2]> {
        match self {
            Occupant::WhitePiece => Some([0, 1]),
            Occupant::BlackPiece => Some([6, 7]),
            Occupant::Empty => None,
        }
    }

    /// Single-character form used in status dumps.
    pub fn symbol(self) -> char {
        match self {
            Occupant::Empty => '.',
            Occupant::WhitePiece => 'W',
            Occupant::BlackPiece => 'B',
        }
    }
}

/// The 8x8 occupancy grid. Exactly one `Occupant` per square by construction.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BoardState {
    squares: [[Occupant; BOARD_SIZE as usize]; BOARD_SIZE as usize],
}

impl BoardState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ranks 1-2 white, ranks 7-8 black, 32 pieces in total.
    pub fn starting_position() -> Self {
        let mut board = Self::empty();
        for square in Square::all() {
            board.set(square, Self::starting_occupant(square));
        }
        board
    }

    /// Occupant of `square` in the standard starting layout.
    pub fn starting_occupant(square: Square) -> Occupant {
        match square.rank() {
            0 | 1 => Occupant::WhitePiece,
            6 | 7 => Occupant::BlackPiece,
            _ => Occupant::Empty,
        }
    }

    pub fn get(&self, square: Square) -> Occupant {
        self.squares[square.rank() as usize][square.file() as usize]
    }

    pub(crate) fn set(&mut self, square: Square, occupant: Occupant) {
        self.squares[square.rank() as usize][square.file() as usize] = occupant;
    }

    pub fn occupied_count(&self) -> usize {
        self.squares.iter().flatten().filter(|o| !o.is_empty()).count()
    }

    /// Squares of one rank, a-file first.
    pub fn rank(&self, rank: u8) -> &[Occupant; BOARD_SIZE as usize] {
        &self.squares[rank as usize]
    }
}

/// Handle to an off-board parking position for a captured piece.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HoldingSlot {
    pub index: u8,
}

impl HoldingSlot {
    pub const fn new(index: u8) -> Self {
        Self { index }
    }
}
