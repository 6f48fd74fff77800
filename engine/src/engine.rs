use std::time::Instant;

use log::debug;

use crate::board::{Board, BoardError, Move, Outcome, PieceColor, SquareSet};

/// Search depth used when nothing else is configured.
pub const MAX_DEPTH: u8 = 4;
/// Upper bound on any configured depth, keeping `WINNING_VALUE + depth` below `INFTY`.
pub const MAX_SEARCH_DEPTH: u8 = 16;
/// Magnitude of a won position: positive for red, negative for blue.
pub const WINNING_VALUE: i32 = i32::MAX - 20;
pub const INFTY: i32 = i32::MAX;

/// How plies below the root are searched.
///
/// `Legacy` reproduces the reference player move for move: every child is
/// searched as a minimizing node and both senses raise `alpha`. Since `beta`
/// never comes down from `+INFTY`, it never prunes. `Standard` is textbook
/// alpha-beta with alternating senses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SearchMode {
    #[default]
    Legacy,
    Standard,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_depth: u8,
    pub mode: SearchMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_depth: MAX_DEPTH, mode: SearchMode::default() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Maximize,
    Minimize,
}

impl Sense {
    /// Red maximizes, blue minimizes.
    pub fn for_color(color: PieceColor) -> Self {
        match color {
            PieceColor::Red => Sense::Maximize,
            PieceColor::Blue => Sense::Minimize,
        }
    }

    fn opposite(self) -> Self {
        match self {
            Sense::Maximize => Sense::Minimize,
            Sense::Minimize => Sense::Maximize,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub nodes: u64,
    /// Deepest ply visited below the root.
    pub max_ply: u32,
}

/// Value of a searched node and the move that first reached it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scored {
    pub score: i32,
    pub best_move: Option<Move>,
}

/// Every legal move for the side to move, or just `Move::Pass` if there is none.
///
/// Sources go column by column, bottom to top; destinations sweep the 5x5
/// window around each source in the same order. Search keeps the first of
/// equally scored moves, so this order decides ties.
pub fn possible_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    for from in board.pieces(board.whose_move()).iter_squares() {
        for dcol in -2..=2 {
            for drow in -2..=2 {
                if let Some(to) = from.offset(dcol, drow) {
                    if board.legal_move(from, to) {
                        moves.push(Move::step(from, to));
                    }
                }
            }
        }
    }
    if moves.is_empty() {
        moves.push(Move::Pass);
    }
    moves
}

/// `±winning_value` for a decided game, 0 for a tie, otherwise red's material lead.
pub fn static_score(board: &Board, winning_value: i32) -> i32 {
    match board.outcome() {
        Outcome::RedWins => winning_value,
        Outcome::BlueWins => -winning_value,
        Outcome::Tie => 0,
        Outcome::InProgress => {
            board.num_pieces(PieceColor::Red) as i32 - board.num_pieces(PieceColor::Blue) as i32
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    stats: SearchStats,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let max_depth = config.max_depth.clamp(1, MAX_SEARCH_DEPTH);
        Self {
            config: EngineConfig { max_depth, ..config },
            stats: SearchStats::default(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Statistics of the most recent search.
    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    /// Chooses a move for the side to move on `board`.
    ///
    /// Returns `Move::Pass` without searching when that side cannot move.
    /// The search runs on a private copy; `board` is never touched.
    pub fn best_move(&mut self, board: &Board) -> Result<Move, BoardError> {
        self.stats = SearchStats::default();
        let side = board.whose_move();
        if !board.can_move(side) {
            debug!("{} has no legal move, passing", side);
            return Ok(Move::Pass);
        }
        if board.outcome().is_over() {
            return Err(BoardError::GameOver);
        }

        let mut working = board.clone();
        let start = Instant::now();
        let depth = self.config.max_depth;
        let result = self.search(&mut working, depth, Sense::for_color(side), -INFTY, INFTY)?;
        debug!(
            "{} searched to depth {}: {:?} scores {} ({} nodes, max ply {}, {:?})",
            side, depth, result.best_move, result.score,
            self.stats.nodes, self.stats.max_ply, start.elapsed(),
        );
        // the first root candidate always improves on ±INFTY
        result.best_move.ok_or(BoardError::GameOver)
    }

    /// Searches `board` to `depth` plies within the `(alpha, beta)` window.
    ///
    /// `board` is handed back unchanged.
    pub fn search(
        &mut self,
        board: &mut Board,
        depth: u8,
        sense: Sense,
        alpha: i32,
        beta: i32,
    ) -> Result<Scored, BoardError> {
        self.stats = SearchStats::default();
        let depth = i32::from(depth.min(MAX_SEARCH_DEPTH));
        self.min_max(board, depth, 0, sense, alpha, beta)
    }

    fn min_max(
        &mut self,
        board: &mut Board,
        depth: i32,
        ply: u32,
        sense: Sense,
        mut alpha: i32,
        mut beta: i32,
    ) -> Result<Scored, BoardError> {
        self.stats.nodes += 1;
        self.stats.max_ply = self.stats.max_ply.max(ply);

        // winning value grows with remaining depth so sooner wins score higher
        if depth == 0 || board.outcome().is_over() {
            let score = static_score(board, WINNING_VALUE + depth);
            return Ok(Scored { score, best_move: None });
        }

        let child_sense = match self.config.mode {
            SearchMode::Legacy => Sense::Minimize,
            SearchMode::Standard => sense.opposite(),
        };
        let mut best = Scored {
            score: match sense {
                Sense::Maximize => -INFTY,
                Sense::Minimize => INFTY,
            },
            best_move: None,
        };

        for mv in possible_moves(board) {
            let score = {
                let mut child = board.play(mv)?;
                let reply = self.min_max(&mut child, depth - 1, ply + 1, child_sense, alpha, beta)?;
                reply.score
            };

            let improved = match sense {
                Sense::Maximize => score > best.score,
                Sense::Minimize => score < best.score,
            };
            if improved {
                best = Scored { score, best_move: Some(mv) };
            }

            match (sense, self.config.mode) {
                (Sense::Maximize, _) | (Sense::Minimize, SearchMode::Legacy) => {
                    alpha = alpha.max(best.score);
                }
                (Sense::Minimize, SearchMode::Standard) => {
                    beta = beta.min(best.score);
                }
            }
            if alpha >= beta {
                return Ok(best);
            }
        }
        Ok(best)
    }
}
