use battle_types::{BattleError, BattleId, BattleMode, PlayerId, PlayerProfile};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use warp::Filter;
use warp::http::StatusCode;

use crate::lobby::BattleLobby;
use crate::websocket::ConnectionManager;
use crate::websocket::rate_limiter::RateLimiter;

pub mod config;
pub mod lobby;
pub mod sync;
pub mod websocket;

#[derive(Deserialize)]
struct BattlesQuery {
    mode: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBattleRequest {
    mode: String,
    host: PlayerProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinBattleRequest {
    player: PlayerProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitSolutionRequest {
    player_id: PlayerId,
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionResponse {
    correct: bool,
    points_earned: i32,
    seconds_remaining: Option<u32>,
}

const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn create_routes(
    connection_manager: Arc<ConnectionManager>,
    lobby: Arc<BattleLobby>,
    rate_limiter: RateLimiter,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    // Clone for filters
    let connection_manager_filter = warp::any().map({
        let connection_manager = connection_manager.clone();
        move || connection_manager.clone()
    });

    let lobby_filter = warp::any().map({
        let lobby = lobby.clone();
        move || lobby.clone()
    });

    // WebSocket endpoint
    let websocket = warp::path("ws")
        .and(warp::ws())
        .and(connection_manager_filter)
        .and(lobby_filter.clone())
        .map(move |ws: warp::ws::Ws, conn_mgr, lobby| {
            // Every connection starts from a full bucket of its own
            let rate_limiter = rate_limiter.clone();
            ws.on_upgrade(move |socket| {
                websocket::handle_connection(socket, conn_mgr, lobby, rate_limiter)
            })
        });

    // Health check endpoint
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    let list_battles = warp::path!("battles")
        .and(warp::get())
        .and(warp::query::<BattlesQuery>())
        .and(lobby_filter.clone())
        .and_then(handle_list_battles_request);

    let get_battle = warp::path!("battles" / String)
        .and(warp::get())
        .and(lobby_filter.clone())
        .and_then(handle_get_battle_request);

    let create_battle = warp::path!("battles")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(lobby_filter.clone())
        .and_then(handle_create_battle_request);

    let join_battle = warp::path!("battles" / String / "join")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(lobby_filter.clone())
        .and_then(handle_join_battle_request);

    let submit_solution = warp::path!("battles" / String / "submit")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(lobby_filter)
        .and_then(handle_submit_solution_request);

    // CORS configuration
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    websocket
        .or(health)
        .or(list_battles)
        .or(get_battle)
        .or(create_battle)
        .or(join_battle)
        .or(submit_solution)
        .with(cors)
        .with(warp::log("code_battle"))
}

/// HTTP status for a failed battle operation.
pub fn error_status(error: &BattleError) -> StatusCode {
    match error {
        BattleError::Validation { .. } | BattleError::TimeExpired => StatusCode::BAD_REQUEST,
        BattleError::NotFound { .. } => StatusCode::NOT_FOUND,
        BattleError::Full { .. }
        | BattleError::AlreadyJoined { .. }
        | BattleError::AlreadySubmitted { .. }
        | BattleError::InvalidState { .. } => StatusCode::CONFLICT,
        BattleError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        BattleError::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_reply(error: BattleError) -> warp::reply::WithStatus<warp::reply::Json> {
    if error.is_retryable() {
        tracing::warn!("Store error while serving request: {}", error);
    }
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": error.to_string()
        })),
        error_status(&error),
    )
}

fn parse_battle_id(battle_id: &str) -> Result<BattleId, BattleError> {
    Uuid::parse_str(battle_id).map_err(|_| BattleError::validation("Invalid battle ID format"))
}

async fn handle_list_battles_request(
    query: BattlesQuery,
    lobby: Arc<BattleLobby>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mode = match query.mode.unwrap_or_default().parse::<BattleMode>() {
        Ok(mode) => mode,
        Err(e) => return Ok(error_reply(e)),
    };

    match lobby.waiting_battles(mode).await {
        Ok(battles) => Ok(warp::reply::with_status(
            warp::reply::json(&battles),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn handle_get_battle_request(
    battle_id: String,
    lobby: Arc<BattleLobby>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let battle_id = match parse_battle_id(&battle_id) {
        Ok(id) => id,
        Err(e) => return Ok(error_reply(e)),
    };

    match lobby.get_battle(battle_id).await {
        Ok(battle) => Ok(warp::reply::with_status(
            warp::reply::json(&battle),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn handle_create_battle_request(
    request: CreateBattleRequest,
    lobby: Arc<BattleLobby>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let mode = match request.mode.parse::<BattleMode>() {
        Ok(mode) => mode,
        Err(e) => return Ok(error_reply(e)),
    };

    match lobby.create_battle(mode, request.host.into()).await {
        Ok(battle) => Ok(warp::reply::with_status(
            warp::reply::json(&battle),
            StatusCode::CREATED,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn handle_join_battle_request(
    battle_id: String,
    request: JoinBattleRequest,
    lobby: Arc<BattleLobby>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let battle_id = match parse_battle_id(&battle_id) {
        Ok(id) => id,
        Err(e) => return Ok(error_reply(e)),
    };

    match lobby.join_battle(battle_id, request.player.into()).await {
        Ok(battle) => Ok(warp::reply::with_status(
            warp::reply::json(&battle),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}

async fn handle_submit_solution_request(
    battle_id: String,
    request: SubmitSolutionRequest,
    lobby: Arc<BattleLobby>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let battle_id = match parse_battle_id(&battle_id) {
        Ok(id) => id,
        Err(e) => return Ok(error_reply(e)),
    };

    match lobby
        .submit_solution(battle_id, &request.player_id, &request.code)
        .await
    {
        Ok(outcome) => Ok(warp::reply::with_status(
            warp::reply::json(&SubmissionResponse {
                correct: outcome.correct,
                points_earned: outcome.points_earned,
                seconds_remaining: outcome.seconds_remaining,
            }),
            StatusCode::OK,
        )),
        Err(e) => Ok(error_reply(e)),
    }
}
