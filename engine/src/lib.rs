//! Ataxx move selection.
//!
//! [`board`] holds the rules: bitboard position, legality, apply/undo and the
//! end-of-game test. [`engine`] picks moves with a fixed-depth alpha-beta
//! search over that board.

pub mod board;
pub mod engine;

pub use board::{Board, BoardError, Cell, Move, Outcome, PieceColor, Square};
pub use engine::{Engine, EngineConfig, SearchMode};
