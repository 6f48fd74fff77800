use std::io::{Error, ErrorKind};
use clap::Parser;
use log::{info, error, LevelFilter};
use tokio::net::{TcpListener, TcpStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::Message;
use ataxx::board::{Board, BoardError, Move, Outcome, PieceColor, Square};
use ataxx::engine::{possible_moves, Engine, EngineConfig, SearchMode, MAX_DEPTH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 7777)]
    port: u16,
    /// Search depth in plies
    #[arg(long, default_value_t = MAX_DEPTH, value_parser = clap::value_parser!(u8).range(1..=16))]
    depth: u8,
    #[arg(long, value_enum, default_value_t = SearchMode::Legacy)]
    search: SearchMode,
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(args.log_level)
        .init()
        .map_err(|e| Error::new(ErrorKind::Other, e))?;

    let config = EngineConfig { max_depth: args.depth, mode: args.search };
    let address = format!("{}:{}", args.host, args.port);

    // Bind the server to a local port
    let listener = TcpListener::bind(address.clone()).await.expect("Failed to bind");
    info!("Listening on: {} (depth {}, {:?} search)", address, config.max_depth, config.mode);

    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(accept_connection(stream, config));
    }

    Ok(())
}

struct Game {
    started: bool,
    player_color: PieceColor,
    board: Board,
    engine: Engine,
}

impl Game {
    fn new(config: EngineConfig) -> Self {
        Self {
            started: false,
            player_color: PieceColor::Red,
            board: Board::new(),
            engine: Engine::new(config),
        }
    }
}

async fn accept_connection(stream: TcpStream, config: EngineConfig) -> Result<(), Error> {
    let addr = stream.peer_addr()?;
    info!("Peer address: {}", addr);

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::new(ErrorKind::ConnectionAborted, e))?;
    info!("New WebSocket connection: {}", addr);

    let (mut write, mut read) = ws_stream.split();

    let mut game = Game::new(config);

    while let Some(raw_message) = read.next().await {
        match raw_message {
            Ok(text_message) => {
                if !text_message.is_text() && !text_message.is_binary() { continue; }
                match serde_json::from_slice::<Value>(&text_message.into_data()) {
                    Ok(data) => {
                        info!("Received: {}", data);
                        // searching is CPU-bound; keep it off the reactor
                        let result = tokio::task::block_in_place(|| handle_message(&mut game, data));
                        let response = match result {
                            Ok(resp) => resp,
                            Err(e) => {
                                error!("Error handling message: {:?}", e);
                                json!({"error": e.to_string()})
                            }
                        };
                        let response_str = response.to_string();
                        if let Err(e) = write.send(Message::text(response_str.clone())).await {
                            error!("Failed to send message {}: {:?}", response_str, e);
                            break;
                        }
                        info!("Sent: {}", response_str);
                    },
                    Err(e) => { error!("Error parsing JSON: {:?}", e); }
                }
            }
            Err(e) => { error!("Error reading websocket message: {:?}", e); }
        }
    }

    info!("Connection closed: {}", addr);
    Ok(())
}

fn invalid_input(e: BoardError) -> Error {
    Error::new(ErrorKind::InvalidInput, e)
}

fn handle_message(game: &mut Game, data: Value) -> Result<Value, Error> {
    let map = data.as_object()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "Expected a dict"))?;

    // client message protocol: "start" (+ optional "blocks"), "move"
    // server message protocol: "move", "board", "legal_moves", "error", "end"
    if map.contains_key("start") {
        let player_color: PieceColor = serde_json::from_value(data["start"].clone())?;
        let blocks = match map.get("blocks") {
            Some(value) => serde_json::from_value::<Vec<String>>(value.clone())?
                .iter()
                .map(|name| name.parse::<Square>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid_input)?,
            None => Vec::new(),
        };
        handle_start(game, player_color, &blocks)
    } else if map.contains_key("move") {
        if !game.started {
            return Err(Error::new(ErrorKind::InvalidInput, "Game has not started yet"));
        }
        let move_: Move = serde_json::from_value(data["move"].clone())?;
        handle_move(game, move_)
    } else {
        Err(Error::new(ErrorKind::InvalidInput, format!("Invalid message: {}", data)))
    }
}

fn handle_start(game: &mut Game, player_color: PieceColor, blocks: &[Square]) -> Result<Value, Error> {
    let mut board = Board::new();
    for &block in blocks {
        board.set_block(block).map_err(invalid_input)?;
    }
    game.board = board;
    game.started = true;
    game.player_color = player_color;
    info!("New game: player is {}, {} block(s)", player_color, blocks.len());
    if game.board.whose_move() == player_color {
        Ok(player_turn(game))
    } else {
        make_engine_move(game)
    }
}

fn handle_move(game: &mut Game, move_: Move) -> Result<Value, Error> {
    if game.board.whose_move() != game.player_color {
        return Err(Error::new(ErrorKind::InvalidInput, "Not the player's turn"));
    }
    game.board.make_move(move_).map_err(invalid_input)?;
    match check_game_over(game) {
        Some(game_over) => Ok(game_over),
        None => make_engine_move(game)
    }
}

fn make_engine_move(game: &mut Game) -> Result<Value, Error> {
    let color = game.board.whose_move();
    let selected_move = game.engine.best_move(&game.board).map_err(invalid_input)?;
    game.board.make_move(selected_move).map_err(invalid_input)?;
    info!("Engine played {} as {}", selected_move, color);
    match check_game_over(game) {
        Some(mut game_over) => {
            game_over["move"] = json!(selected_move);
            Ok(game_over)
        },
        None => {
            let mut response = player_turn(game);
            response["move"] = json!(selected_move);
            Ok(response)
        }
    }
}

fn player_turn(game: &Game) -> Value {
    json!({ "board": game.board.to_string(), "legal_moves": possible_moves(&game.board) })
}

fn check_game_over(game: &Game) -> Option<Value> {
    let end = match game.board.outcome() {
        Outcome::RedWins => json!(PieceColor::Red),
        Outcome::BlueWins => json!(PieceColor::Blue),
        Outcome::Tie => json!("tie"),
        Outcome::InProgress => return None,
    };
    Some(json!({ "end": end, "board": game.board.to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> Game {
        Game::new(EngineConfig { max_depth: 1, mode: SearchMode::Legacy })
    }

    #[test]
    fn test_move_before_start() {
        let mut game = game();
        let err = handle_message(&mut game, json!({"move": "g1-f2"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_unknown_message() {
        let mut game = game();
        assert!(handle_message(&mut game, json!({"hello": 1})).is_err());
        assert!(handle_message(&mut game, json!([1, 2])).is_err());
    }

    #[test]
    fn test_start_as_red() {
        let mut game = game();
        let response = handle_message(&mut game, json!({"start": "red"})).unwrap();
        assert!(response.get("move").is_none());
        assert_eq!(response["legal_moves"].as_array().unwrap().len(), 16);
        assert_eq!(response["legal_moves"][0], json!("a7-a5"));
        assert!(game.started);
    }

    #[test]
    fn test_start_as_blue_lets_engine_open() {
        let mut game = game();
        let response = handle_message(&mut game, json!({"start": "blue"})).unwrap();
        // first clone in enumeration order scores +1 at depth 1
        assert_eq!(response["move"], json!("a7-a6"));
        assert_eq!(game.board.whose_move(), PieceColor::Blue);
    }

    #[test]
    fn test_player_move_gets_reply() {
        let mut game = game();
        handle_message(&mut game, json!({"start": "red"})).unwrap();
        let response = handle_message(&mut game, json!({"move": "g1-f2"})).unwrap();
        assert!(response["move"].is_string());
        assert_eq!(game.board.whose_move(), PieceColor::Red);
        assert_eq!(game.board.num_moves(), 2);
    }

    #[test]
    fn test_illegal_player_move() {
        let mut game = game();
        handle_message(&mut game, json!({"start": "red"})).unwrap();
        let err = handle_message(&mut game, json!({"move": "a1-a2"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("illegal move"));
        assert!(handle_message(&mut game, json!({"move": "nonsense"})).is_err());
        assert_eq!(game.board.num_moves(), 0);
    }

    #[test]
    fn test_start_with_blocks() {
        let mut game = game();
        let response = handle_message(&mut game, json!({"start": "red", "blocks": ["c3"]})).unwrap();
        let board = response["board"].as_str().unwrap();
        assert_eq!(board.matches('X').count(), 4);
        assert!(handle_message(&mut game, json!({"start": "red", "blocks": ["a1"]})).is_err());
        assert!(handle_message(&mut game, json!({"start": "red", "blocks": ["z9"]})).is_err());
    }

    #[test]
    fn test_game_over_reported() {
        let mut game = game();
        handle_message(&mut game, json!({"start": "red"})).unwrap();
        game.board = Board::from_layout("
            - - - - - - -
            - - - - - - -
            - - - - - - -
            - - - - - - -
            - - - - - - -
            - b - - - - -
            r - - - - - -
        ", PieceColor::Red).unwrap();
        let response = handle_message(&mut game, json!({"move": "a1-a2"})).unwrap();
        assert_eq!(response["end"], json!("red"));
        assert!(response.get("move").is_none());
    }
}
