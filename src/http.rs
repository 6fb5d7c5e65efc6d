use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use blinkit_common::{LedController, LedError, Patch, Pixel, Snapshot};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};
use tower_http::trace::TraceLayer;

const UPDATE_BACKLOG: usize = 16;

#[derive(Clone)]
pub struct AppState {
    controller: Arc<LedController>,
    secret_key: Arc<str>,
    updates: broadcast::Sender<Snapshot>,
    fatal: Arc<Notify>,
}

impl AppState {
    /// `fatal` is notified once a mutation hits a transport fault.
    pub fn new(controller: Arc<LedController>, secret_key: &str, fatal: Arc<Notify>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        Self {
            controller,
            secret_key: Arc::from(secret_key),
            updates,
            fatal,
        }
    }

    fn is_authorized(&self, key: Option<&str>) -> bool {
        key == Some(&*self.secret_key)
    }

    async fn apply(&self, authorized: bool, patches: Vec<Patch>) -> Result<Snapshot, LedError> {
        debug!(authorized, busy = self.controller.guard().is_busy(), ?patches, "patch request");

        match self.controller.patch(authorized, patches).await {
            Ok(snapshot) => {
                // no subscribers is fine
                let _ = self.updates.send(snapshot);
                Ok(snapshot)
            }
            Err(err) if err.is_fatal() => {
                error!("transport fault: {err}");
                self.fatal.notify_one();
                Err(err)
            }
            Err(err) => {
                warn!(kind = err.kind(), "patch rejected: {err}");
                Err(err)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PixelView {
    pub position: usize,
    #[serde(flatten)]
    pub pixel: Pixel,
    pub colour: String,
}

#[derive(Debug, Serialize)]
pub struct PixelsBody {
    pub pixels: Vec<PixelView>,
}

impl From<&Snapshot> for PixelsBody {
    fn from(snapshot: &Snapshot) -> Self {
        let pixels = snapshot
            .iter()
            .enumerate()
            .map(|(position, pixel)| PixelView {
                position,
                pixel: *pixel,
                colour: pixel.to_string(),
            })
            .collect();

        Self { pixels }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub msg: String,
}

impl From<&LedError> for ErrorBody {
    fn from(err: &LedError) -> Self {
        Self {
            kind: err.kind().into(),
            msg: err.to_string(),
        }
    }
}

pub struct ApiError(LedError);

impl From<LedError> for ApiError {
    fn from(err: LedError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            LedError::Validation(_) => StatusCode::BAD_REQUEST,
            LedError::Busy => StatusCode::CONFLICT,
            LedError::Unauthorized => StatusCode::UNAUTHORIZED,
            LedError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/leds", get(get_leds).post(post_leds))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "pkg": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "msg": "ok",
    }))
}

async fn get_leds(State(state): State<AppState>) -> Json<PixelsBody> {
    Json(PixelsBody::from(&state.controller.snapshot()))
}

async fn post_leds(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Vec<Patch>>, JsonRejection>,
) -> Result<Json<PixelsBody>, ApiError> {
    let key = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let authorized = state.is_authorized(key);

    let patches = match body {
        Ok(Json(patches)) => patches,
        Err(_) if !authorized => return Err(LedError::Unauthorized.into()),
        Err(_) if state.controller.guard().is_busy() => return Err(LedError::Busy.into()),
        Err(rejection) => return Err(LedError::Validation(rejection.body_text()).into()),
    };

    let snapshot = state.apply(authorized, patches).await?;
    Ok(Json(PixelsBody::from(&snapshot)))
}

/// Patch request sent over the socket.
#[derive(Debug, Deserialize)]
struct SocketPatch {
    auth: String,
    patches: Vec<Patch>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SocketReply {
    Pixels(PixelsBody),
    Error(ErrorBody),
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state))
}

async fn ws_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut updates = state.updates.subscribe();

    let current = SocketReply::Pixels(PixelsBody::from(&state.controller.snapshot()));
    if send(&mut sink, &current).await.is_err() {
        return;
    }

    loop {
        let reply = tokio::select! {
            update = updates.recv() => match update {
                Ok(snapshot) => SocketReply::Pixels(PixelsBody::from(&snapshot)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "socket fell behind, resending current state");
                    SocketReply::Pixels(PixelsBody::from(&state.controller.snapshot()))
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match handle_text(&state, &text).await {
                    Some(reply) => reply,
                    None => continue,
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    debug!("socket error: {err}");
                    break;
                }
            },
        };

        if send(&mut sink, &reply).await.is_err() {
            break;
        }
    }
}

/// Successful patches are not answered directly, the broadcast carries the
/// new state to every socket including this one.
async fn handle_text(state: &AppState, text: &str) -> Option<SocketReply> {
    let request: SocketPatch = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            let err = LedError::Validation(format!("invalid patch message: {err}"));
            return Some(SocketReply::Error(ErrorBody::from(&err)));
        }
    };

    let authorized = state.is_authorized(Some(&request.auth));
    match state.apply(authorized, request.patches).await {
        Ok(_) => None,
        Err(err) => Some(SocketReply::Error(ErrorBody::from(&err))),
    }
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, reply: &SocketReply) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(reply) {
        Ok(text) => text,
        Err(err) => {
            error!("failed to encode socket reply: {err}");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use blinkit_common::{
        PIXEL_COUNT, PixelStore, TransportFault,
        transport::{SimulatedTransport, Transport},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::io;
    use tower::ServiceExt;

    const KEY: &str = "hunter2";

    fn state() -> AppState {
        let transport = SimulatedTransport::new(Arc::new(PixelStore::new()), io::sink());
        let controller = Arc::new(LedController::new(Box::new(transport)));
        controller.setup().unwrap();
        AppState::new(controller, KEY, Arc::new(Notify::new()))
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(key: Option<&str>, body: Value) -> Request<Body> {
        let mut request = Request::post("/leds").header("content-type", "application/json");
        if let Some(key) = key {
            request = request.header("authorization", key);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn index_reports_package() {
        let (status, body) = call(&state(), Request::get("/").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["msg"], "ok");
        assert_eq!(body["pkg"]["name"], "blinkit");
    }

    #[tokio::test]
    async fn lists_all_pixels_off_on_start() {
        let (status, body) = call(&state(), Request::get("/leds").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        let pixels = body["pixels"].as_array().unwrap();
        assert_eq!(pixels.len(), PIXEL_COUNT);
        assert_eq!(
            pixels[4],
            json!({ "position": 4, "r": 0, "g": 0, "b": 0, "a": 0, "colour": "#00000000" })
        );
    }

    #[test_log::test(tokio::test)]
    async fn patch_updates_and_returns_pixels() {
        let state = state();
        let (status, body) = call(
            &state,
            post(Some(KEY), json!([{ "position": 3, "colour": "#ff00ff80" }])),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pixels"][3]["colour"], "#ff00ff80");
        assert_eq!(body["pixels"][3]["a"], 0x80);

        let (_, listed) = call(&state, Request::get("/leds").body(Body::empty()).unwrap()).await;
        assert_eq!(listed, body);
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let state = state();
        for key in [None, Some("nope")] {
            let (status, body) = call(
                &state,
                post(key, json!([{ "position": 0, "colour": "#ffffffff" }])),
            )
            .await;

            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["kind"], "unauthorized");
        }
        assert_eq!(state.controller.snapshot()[0], Pixel::OFF);
    }

    #[tokio::test]
    async fn malformed_colour_is_bad_request() {
        let state = state();
        let (status, body) = call(
            &state,
            post(Some(KEY), json!([{ "position": 2, "colour": "zz" }])),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(state.controller.snapshot(), [Pixel::OFF; PIXEL_COUNT]);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (status, body) = call(&state(), post(Some(KEY), json!({ "position": 1 }))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn busy_guard_is_conflict() {
        let state = state();
        let _held = state.controller.guard().try_acquire().unwrap();

        let (status, body) = call(
            &state,
            post(Some(KEY), json!([{ "position": 0, "colour": "#ffffffff" }])),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "busy");
        assert_eq!(body["msg"], "Already running");
    }

    #[tokio::test]
    async fn busy_guard_outranks_malformed_body() {
        let state = state();
        let _held = state.controller.guard().try_acquire().unwrap();

        let (status, body) = call(&state, post(Some(KEY), json!({ "position": 1 }))).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "busy");
    }

    struct BrokenTransport(Arc<PixelStore>);

    impl Transport for BrokenTransport {
        fn store(&self) -> &Arc<PixelStore> {
            &self.0
        }

        fn setup(&mut self) -> Result<(), TransportFault> {
            Ok(())
        }

        fn teardown(&mut self) -> Result<(), TransportFault> {
            Ok(())
        }

        fn emit(&mut self, _: &Snapshot) -> Result<(), TransportFault> {
            Err(TransportFault::NotSetUp)
        }
    }

    #[tokio::test]
    async fn transport_fault_signals_shutdown() {
        let fatal = Arc::new(Notify::new());
        let controller = Arc::new(LedController::new(Box::new(BrokenTransport(Arc::new(
            PixelStore::new(),
        )))));
        let state = AppState::new(controller, KEY, Arc::clone(&fatal));

        let (status, body) = call(
            &state,
            post(Some(KEY), json!([{ "position": 0, "colour": "#ffffffff" }])),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "transport");
        tokio::time::timeout(std::time::Duration::from_secs(1), fatal.notified())
            .await
            .expect("fault was not signalled");
    }

    #[tokio::test]
    async fn socket_patches_are_broadcast() {
        let state = state();
        let mut updates = state.updates.subscribe();

        let message = json!({ "auth": KEY, "patches": [{ "position": 6, "colour": "#0000ff27" }] });
        assert!(handle_text(&state, &message.to_string()).await.is_none());

        let snapshot = updates.recv().await.unwrap();
        assert_eq!(snapshot[6], Pixel::new(0, 0, 0xff, 0x27));
    }

    #[tokio::test]
    async fn socket_errors_are_replied() {
        let state = state();

        let reply = handle_text(&state, "not json").await;
        assert!(matches!(reply, Some(SocketReply::Error(ErrorBody { ref kind, .. })) if kind == "validation"));

        let message = json!({ "auth": "wrong", "patches": [] });
        let reply = handle_text(&state, &message.to_string()).await;
        assert!(matches!(reply, Some(SocketReply::Error(ErrorBody { ref kind, .. })) if kind == "unauthorized"));
    }

    type Socket = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect(addr: std::net::SocketAddr) -> Socket {
        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        socket
    }

    async fn next_reply(socket: &mut Socket) -> Value {
        loop {
            let message = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
                .await
                .expect("no reply from socket")
                .expect("socket closed")
                .unwrap();
            if let tokio_tungstenite::tungstenite::Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test_log::test(tokio::test)]
    async fn sockets_share_state_over_the_wire() {
        let state = state();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, router(state.clone())).into_future());

        // the connect snapshot also means the session is subscribed
        let mut sender = connect(addr).await;
        let hello = next_reply(&mut sender).await;
        assert_eq!(hello["type"], "pixels");
        assert_eq!(hello["pixels"].as_array().unwrap().len(), PIXEL_COUNT);

        let mut watcher = connect(addr).await;
        assert_eq!(next_reply(&mut watcher).await, hello);

        let message = json!({ "auth": KEY, "patches": [{ "position": 6, "colour": "#0000ff27" }] });
        sender
            .send(tokio_tungstenite::tungstenite::Message::Text(message.to_string()))
            .await
            .unwrap();

        for socket in [&mut watcher, &mut sender] {
            let update = next_reply(socket).await;
            assert_eq!(update["type"], "pixels");
            assert_eq!(update["pixels"][6]["colour"], "#0000ff27");
        }

        let message = json!({ "auth": "wrong", "patches": [] });
        sender
            .send(tokio_tungstenite::tungstenite::Message::Text(message.to_string()))
            .await
            .unwrap();

        let reply = next_reply(&mut sender).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["kind"], "unauthorized");
        assert_eq!(state.controller.snapshot()[6], Pixel::new(0, 0, 0xff, 0x27));
    }

    #[test]
    fn socket_reply_is_tagged() {
        let reply = SocketReply::Pixels(PixelsBody::from(&[Pixel::OFF; PIXEL_COUNT]));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["type"], "pixels");
        assert_eq!(value["pixels"].as_array().unwrap().len(), PIXEL_COUNT);
    }
}
