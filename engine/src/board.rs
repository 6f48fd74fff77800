use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use bitvec::{prelude::*, slice::IterOnes};
use serde::ser::{Serialize, Serializer};
use serde::de::{Deserialize, Deserializer, Visitor};
use lazy_static::lazy_static;
use thiserror::Error;

pub const SIDE: usize = 7;
const B: usize = SIDE * SIDE;
/// Consecutive jumps (without an intervening clone) that end the game.
pub const JUMP_LIMIT: u8 = 25;
pub type BitBoard = BitArr!(for B, in u64, Lsb0);
// squares are stored column-major: a1, a2, ..., a7, b1, ...
// so iterating set bits visits columns ascending, then rows ascending

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("illegal move: {0}")]
    IllegalMove(Move),
    #[error("game is over")]
    GameOver,
    #[error("cannot block {0}: it or one of its reflections is occupied")]
    InvalidBlock(Square),
    #[error("blocks can only be placed before the first move")]
    BlockAfterStart,
    #[error("invalid square: {0:?}")]
    ParseSquare(String),
    #[error("invalid move: {0:?}")]
    ParseMove(String),
    #[error("invalid board layout: {0}")]
    ParseLayout(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Square {
    col: u8,
    row: u8,
}

impl Square {
    /// Returns `None` when `(col, row)` is off the board.
    pub fn new(col: usize, row: usize) -> Option<Self> {
        if col < SIDE && row < SIDE {
            Some(Self::at(col, row))
        } else {
            None
        }
    }

    fn at(col: usize, row: usize) -> Self {
        Self { col: col as u8, row: row as u8 }
    }

    fn from_index(idx: usize) -> Self {
        Self::at(idx / SIDE, idx % SIDE)
    }

    fn index(&self) -> usize {
        self.col() * SIDE + self.row()
    }

    pub fn col(&self) -> usize {
        self.col as usize
    }

    pub fn row(&self) -> usize {
        self.row as usize
    }

    pub fn offset(&self, dcol: i32, drow: i32) -> Option<Self> {
        let col = self.col as i32 + dcol;
        let row = self.row as i32 + drow;
        if col < 0 || row < 0 {
            return None;
        }
        Self::new(col as usize, row as usize)
    }

    /// Chebyshev distance: 1 for a clone, 2 for a jump.
    pub fn distance(&self, other: Square) -> usize {
        self.col().abs_diff(other.col()).max(self.row().abs_diff(other.row()))
    }

    fn reflections(&self) -> [Square; 4] {
        let (col, row) = (self.col(), self.row());
        let (mcol, mrow) = (SIDE - 1 - col, SIDE - 1 - row);
        [Self::at(col, row), Self::at(mcol, row), Self::at(col, mrow), Self::at(mcol, mrow)]
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.col) as char, self.row + 1)
    }
}

impl FromStr for Square {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || BoardError::ParseSquare(s.to_string());
        let mut chars = s.chars();
        let (col, row) = match (chars.next(), chars.next(), chars.next()) {
            (Some(col), Some(row), None) => (col, row),
            _ => return Err(err()),
        };
        if !('a'..='g').contains(&col) || !('1'..='7').contains(&row) {
            return Err(err());
        }
        Ok(Self::at(col as usize - 'a' as usize, row as usize - '1' as usize))
    }
}

pub trait SquareSet {
    fn empty() -> Self;
    fn set_square(&mut self, sq: Square, value: bool);
    fn has_square(&self, sq: Square) -> bool;
    type IterSquares<'a>: Iterator<Item=Square> + 'a where Self: 'a;
    fn iter_squares(&'_ self) -> Self::IterSquares<'_>;
}

impl SquareSet for BitBoard {
    fn empty() -> Self {
        bitarr!(u64, Lsb0; 0; B)
    }

    fn set_square(&mut self, sq: Square, value: bool) {
        self.set(sq.index(), value);
    }

    fn has_square(&self, sq: Square) -> bool {
        self[sq.index()]
    }

    type IterSquares<'a> = std::iter::Map<IterOnes<'a, u64, Lsb0>, fn(usize) -> Square>;

    fn iter_squares(&'_ self) -> Self::IterSquares<'_> {
        self.iter_ones().map(Square::from_index as fn(usize) -> Square)
    }
}

fn ring_masks(reach: i32) -> Vec<BitBoard> {
    (0..B).map(|idx| {
        let center = Square::from_index(idx);
        let mut mask = BitBoard::empty();
        for dcol in -reach..=reach {
            for drow in -reach..=reach {
                if (dcol, drow) == (0, 0) {
                    continue;
                }
                if let Some(sq) = center.offset(dcol, drow) {
                    mask.set_square(sq, true);
                }
            }
        }
        mask
    }).collect()
}

lazy_static! {
    // the backing u64 has spare high bits; complements must be masked with this
    static ref ON_BOARD: BitBoard = {
        let mut mask = BitBoard::empty();
        for idx in 0..B {
            mask.set(idx, true);
        }
        mask
    };
    static ref ADJACENT: Vec<BitBoard> = ring_masks(1);
    static ref NEIGHBORHOOD: Vec<BitBoard> = ring_masks(2);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceColor {
    Red,
    Blue,
}

impl PieceColor {
    pub fn opposite(&self) -> Self {
        match self {
            PieceColor::Red => PieceColor::Blue,
            PieceColor::Blue => PieceColor::Red,
        }
    }
}

impl fmt::Display for PieceColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceColor::Red => write!(f, "red"),
            PieceColor::Blue => write!(f, "blue"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Red,
    Blue,
    Blocked,
}

impl Cell {
    fn symbol(&self) -> char {
        match self {
            Cell::Empty => '-',
            Cell::Red => 'r',
            Cell::Blue => 'b',
            Cell::Blocked => 'X',
        }
    }
}

/// Result of the terminal-state query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    RedWins,
    BlueWins,
    Tie,
    InProgress,
}

impl Outcome {
    pub fn is_over(&self) -> bool {
        *self != Outcome::InProgress
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Move {
    /// Only legal when the side to move has no transfer available.
    Pass,
    Step { from: Square, to: Square },
}

impl Move {
    pub fn step(from: Square, to: Square) -> Self {
        Move::Step { from, to }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Move::Pass)
    }

    pub fn is_clone(&self) -> bool {
        matches!(self, Move::Step { from, to } if from.distance(*to) == 1)
    }

    pub fn is_jump(&self) -> bool {
        matches!(self, Move::Step { from, to } if from.distance(*to) == 2)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Move::Pass => write!(f, "-"),
            Move::Step { from, to } => write!(f, "{}-{}", from, to),
        }
    }
}

impl FromStr for Move {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "-" {
            return Ok(Move::Pass);
        }
        let (from, to) = s.split_once('-').ok_or_else(|| BoardError::ParseMove(s.to_string()))?;
        let parse = |sq: &str| sq.parse::<Square>().map_err(|_| BoardError::ParseMove(s.to_string()));
        Ok(Move::step(parse(from)?, parse(to)?))
    }
}

impl Serialize for Move {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        serializer.serialize_str(&self.to_string())
    }
}

struct MoveVisitor;
impl<'de> Visitor<'de> for MoveVisitor {
    type Value = Move;
    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a move such as \"a1-b2\", or \"-\" to pass")
    }
    fn visit_str<E>(self, value: &str) -> Result<Move, E> where E: serde::de::Error {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Move {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where D: Deserializer<'de> {
        deserializer.deserialize_str(MoveVisitor)
    }
}

/// What `undo` needs to restore the position before a move.
#[derive(PartialEq, Eq, Clone, Debug)]
struct Undo {
    mv: Move,
    infected: BitBoard,
    num_jumps: u8,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Board {
    red_squares: BitBoard,
    blue_squares: BitBoard,
    blocked_squares: BitBoard,
    turn: PieceColor,
    num_jumps: u8,
    history: Vec<Undo>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    /// Standard opening: red on a7 and g1, blue on a1 and g7, red to move.
    pub fn new() -> Self {
        let mut board = Self::empty();
        let last = SIDE - 1;
        board.set(Square::at(0, last), Cell::Red);
        board.set(Square::at(last, 0), Cell::Red);
        board.set(Square::at(0, 0), Cell::Blue);
        board.set(Square::at(last, last), Cell::Blue);
        board
    }

    /// A board with no pieces and no blocks, red to move.
    pub fn empty() -> Self {
        Self {
            red_squares: BitBoard::empty(),
            blue_squares: BitBoard::empty(),
            blocked_squares: BitBoard::empty(),
            turn: PieceColor::Red,
            num_jumps: 0,
            history: Vec::new(),
        }
    }

    /// Parses the diagram printed by `Display`: seven lines, row 7 first,
    /// `r`/`b`/`X`/`-` per cell. Whitespace inside a line is ignored.
    pub fn from_layout(layout: &str, turn: PieceColor) -> Result<Self, BoardError> {
        let rows: Vec<Vec<char>> = layout.lines()
            .map(|line| line.chars().filter(|c| !c.is_whitespace()).collect::<Vec<_>>())
            .filter(|row| !row.is_empty())
            .collect();
        if rows.len() != SIDE || rows.iter().any(|row| row.len() != SIDE) {
            return Err(BoardError::ParseLayout(format!("expected {} rows of {} cells", SIDE, SIDE)));
        }

        let mut board = Self::empty();
        board.turn = turn;
        for (i, cells) in rows.iter().enumerate() {
            let row = SIDE - 1 - i;
            for (col, symbol) in cells.iter().enumerate() {
                let cell = match symbol {
                    'r' => Cell::Red,
                    'b' => Cell::Blue,
                    'X' => Cell::Blocked,
                    '-' => Cell::Empty,
                    other => return Err(BoardError::ParseLayout(format!("unknown cell {:?}", other))),
                };
                board.set(Square::at(col, row), cell);
            }
        }
        Ok(board)
    }

    pub fn whose_move(&self) -> PieceColor {
        self.turn
    }

    pub fn num_moves(&self) -> usize {
        self.history.len()
    }

    pub fn num_jumps(&self) -> u8 {
        self.num_jumps
    }

    pub fn get(&self, sq: Square) -> Cell {
        if self.red_squares.has_square(sq) {
            Cell::Red
        } else if self.blue_squares.has_square(sq) {
            Cell::Blue
        } else if self.blocked_squares.has_square(sq) {
            Cell::Blocked
        } else {
            Cell::Empty
        }
    }

    /// Setup edit. Editing a board discards its undo history.
    pub fn set(&mut self, sq: Square, cell: Cell) {
        self.red_squares.set_square(sq, cell == Cell::Red);
        self.blue_squares.set_square(sq, cell == Cell::Blue);
        self.blocked_squares.set_square(sq, cell == Cell::Blocked);
        self.history.clear();
    }

    /// Blocks `sq` together with its left-right, top-bottom and diagonal
    /// reflections. Only allowed before the first move.
    pub fn set_block(&mut self, sq: Square) -> Result<(), BoardError> {
        if !self.history.is_empty() {
            return Err(BoardError::BlockAfterStart);
        }
        let reflections = sq.reflections();
        if reflections.iter().any(|r| matches!(self.get(*r), Cell::Red | Cell::Blue)) {
            return Err(BoardError::InvalidBlock(sq));
        }
        for r in reflections {
            self.blocked_squares.set_square(r, true);
        }
        Ok(())
    }

    pub fn pieces(&self, color: PieceColor) -> BitBoard {
        match color {
            PieceColor::Red => self.red_squares,
            PieceColor::Blue => self.blue_squares,
        }
    }

    pub fn num_pieces(&self, color: PieceColor) -> usize {
        self.pieces(color).count_ones()
    }

    fn empty_squares(&self) -> BitBoard {
        !(self.red_squares | self.blue_squares | self.blocked_squares) & *ON_BOARD
    }

    fn get_player_squares(&mut self, color: PieceColor) -> (&mut BitBoard, &mut BitBoard) {
        match color {
            PieceColor::Red => (&mut self.red_squares, &mut self.blue_squares),
            PieceColor::Blue => (&mut self.blue_squares, &mut self.red_squares),
        }
    }

    /// Whether the side to move may transfer a piece from `from` to `to`.
    pub fn legal_move(&self, from: Square, to: Square) -> bool {
        self.pieces(self.turn).has_square(from)
            && self.empty_squares().has_square(to)
            && matches!(from.distance(to), 1 | 2)
    }

    pub fn can_move(&self, color: PieceColor) -> bool {
        let empty = self.empty_squares();
        self.pieces(color).iter_squares().any(|sq| (NEIGHBORHOOD[sq.index()] & empty).any())
    }

    pub fn outcome(&self) -> Outcome {
        let red = self.num_pieces(PieceColor::Red);
        let blue = self.num_pieces(PieceColor::Blue);
        let over = red == 0
            || blue == 0
            || self.num_jumps >= JUMP_LIMIT
            || (!self.can_move(PieceColor::Red) && !self.can_move(PieceColor::Blue));
        if !over {
            return Outcome::InProgress;
        }
        match red.cmp(&blue) {
            std::cmp::Ordering::Greater => Outcome::RedWins,
            std::cmp::Ordering::Less => Outcome::BlueWins,
            std::cmp::Ordering::Equal => Outcome::Tie,
        }
    }

    pub fn make_move(&mut self, mv: Move) -> Result<(), BoardError> {
        if self.outcome().is_over() {
            return Err(BoardError::GameOver);
        }
        let num_jumps = self.num_jumps;
        let infected = match mv {
            Move::Pass => {
                if self.can_move(self.turn) {
                    return Err(BoardError::IllegalMove(mv));
                }
                BitBoard::empty()
            }
            Move::Step { from, to } => {
                if !self.legal_move(from, to) {
                    return Err(BoardError::IllegalMove(mv));
                }
                if mv.is_jump() {
                    self.num_jumps += 1;
                } else {
                    self.num_jumps = 0;
                }
                let (my_squares, opp_squares) = self.get_player_squares(self.turn);
                my_squares.set_square(to, true);
                if mv.is_jump() {
                    my_squares.set_square(from, false);
                }
                let infected = ADJACENT[to.index()] & *opp_squares;
                *opp_squares &= !infected;
                *my_squares |= infected;
                infected
            }
        };
        self.history.push(Undo { mv, infected, num_jumps });
        self.turn = self.turn.opposite();
        Ok(())
    }

    /// Applies `mv` and returns a guard that undoes it when dropped.
    pub fn play(&mut self, mv: Move) -> Result<Played<'_>, BoardError> {
        self.make_move(mv)?;
        Ok(Played { board: self })
    }

    /// Reverses the most recent move. Returns `None` if there is nothing to undo.
    pub fn undo(&mut self) -> Option<Move> {
        let Undo { mv, infected, num_jumps } = self.history.pop()?;
        let mover = self.turn.opposite();
        if let Move::Step { from, to } = mv {
            let (my_squares, opp_squares) = self.get_player_squares(mover);
            *my_squares &= !infected;
            *opp_squares |= infected;
            my_squares.set_square(to, false);
            if mv.is_jump() {
                my_squares.set_square(from, true);
            }
        }
        self.num_jumps = num_jumps;
        self.turn = mover;
        Some(mv)
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in (0..SIDE).rev() {
            write!(f, " ")?;
            for col in 0..SIDE {
                write!(f, " {}", self.get(Square::at(col, row)).symbol())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A move applied to a borrowed board. Dropping the guard undoes the move,
/// so every exit path out of a scope restores the position.
pub struct Played<'a> {
    board: &'a mut Board,
}

impl Deref for Played<'_> {
    type Target = Board;

    fn deref(&self) -> &Board {
        self.board
    }
}

impl DerefMut for Played<'_> {
    fn deref_mut(&mut self) -> &mut Board {
        self.board
    }
}

impl Drop for Played<'_> {
    fn drop(&mut self) {
        let undone = self.board.undo();
        debug_assert!(undone.is_some(), "guarded move was already undone");
    }
}
