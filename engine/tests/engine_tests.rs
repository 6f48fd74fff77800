use ataxx::engine::{possible_moves, static_score, Sense, INFTY, WINNING_VALUE};
use ataxx::{Board, Engine, EngineConfig, Move, Outcome, PieceColor, SearchMode};

fn play_out(config: EngineConfig) -> (Vec<Move>, Outcome) {
    let mut board = Board::new();
    let mut engine = Engine::new(config);
    let mut moves = Vec::new();
    while !board.outcome().is_over() {
        let chosen = engine.best_move(&board).unwrap();
        board.make_move(chosen).unwrap();
        moves.push(chosen);
        assert!(moves.len() < 2000, "game did not terminate");
    }
    (moves, board.outcome())
}

#[test]
fn test_self_play_terminates_and_is_deterministic() {
    let config = EngineConfig { max_depth: 2, mode: SearchMode::Standard };
    let (first, first_outcome) = play_out(config);
    let (second, second_outcome) = play_out(config);
    assert_eq!(first, second);
    assert_eq!(first_outcome, second_outcome);
    assert!(first_outcome.is_over());
}

#[test]
fn test_legacy_self_play_only_plays_legal_moves() {
    let (moves, outcome) = play_out(EngineConfig { max_depth: 1, mode: SearchMode::Legacy });
    assert!(outcome.is_over());
    assert!(moves.iter().any(|m| m.is_clone()));
}

#[test]
fn test_best_move_is_enumerated() {
    let mut board = Board::new();
    board.make_move("a7-b6".parse().unwrap()).unwrap();
    let chosen = Engine::default().best_move(&board).unwrap();
    assert!(possible_moves(&board).contains(&chosen));
}

#[test]
fn test_blue_decision_uses_minimizing_root() {
    let board = Board::from_layout("
        - - - - - - b
        - - - - - - -
        - - - - - - -
        - - - - - - -
        - - - - - - -
        - - - - - - -
        r - - - - - -
    ", PieceColor::Blue).unwrap();
    let mut engine = Engine::new(EngineConfig { max_depth: 1, mode: SearchMode::Standard });
    let mut working = board.clone();
    let result = engine.search(&mut working, 1, Sense::Minimize, -INFTY, INFTY).unwrap();
    assert_eq!(result.score, -1);
    assert_eq!(result.best_move, Some("g7-f6".parse().unwrap()));
    assert_eq!(working, board);
}

#[test]
fn test_forced_win_outranks_material() {
    // red can wipe out blue at once; any other line only gains material
    let board = Board::from_layout("
        - - - - - - -
        - - - - - - -
        - - - - - - -
        - - - - - - -
        - - - - - - -
        b b - - - - -
        - - r - - - -
    ", PieceColor::Red).unwrap();
    let mut engine = Engine::new(EngineConfig { max_depth: 2, mode: SearchMode::Standard });
    let chosen = engine.best_move(&board).unwrap();
    let mut after = board.clone();
    after.make_move(chosen).unwrap();
    assert_eq!(after.outcome(), Outcome::RedWins);
    assert_eq!(static_score(&after, WINNING_VALUE), WINNING_VALUE);
}
