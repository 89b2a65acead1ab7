//! Web page and JSON API on top of the alarm store.

mod page;

use std::{future::Future, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::{
    alarm::{Alarm, AlarmBuilder, TimeOfDay},
    config::Config,
    error::{Error, Result},
    notifier::Notifier,
    sounds::{Sound, SoundLibrary},
    store::AlarmStore,
};

/// Shared application state.
pub struct AppState {
    pub store: Arc<AlarmStore>,
    pub notifier: Arc<dyn Notifier>,
    pub sounds: SoundLibrary,
    pub config: Config,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("sounds", &self.sounds)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// delete an alarm and silence it if it was ringing
    fn delete(&self, id: u64) -> Result<Alarm> {
        let deleted = self.store.delete(id);
        if !matches!(deleted, Err(Error::NotFound(_))) {
            self.notifier.stop(id);
        }
        deleted
    }

    fn set_enabled(&self, id: u64, enabled: bool) -> Result<Alarm> {
        let alarm = self.store.set_enabled(id, enabled)?;
        if !enabled {
            self.notifier.stop(id);
        }
        Ok(alarm)
    }
}

/// Run a store call on the blocking pool, since the store waits on file I/O.
async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Error type for the JSON API.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) | Error::Playback(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/alarms", post(submit_alarm))
        .route("/alarms/{id}/delete", post(submit_delete))
        .route("/alarms/{id}/toggle", post(submit_toggle))
        .route("/stop", post(submit_stop))
        .route("/test", post(submit_test))
        .route("/api/alarms", get(list_alarms).post(create_alarm))
        .route("/api/alarms/{id}", delete(delete_alarm))
        .route("/api/alarms/{id}/enable", post(enable_alarm))
        .route("/api/alarms/{id}/disable", post(disable_alarm))
        .route("/api/stop", post(stop_ringing))
        .route("/api/sounds", get(list_sounds))
        .route("/api/status", get(status))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
/// `Error::Io` if `addr` can't be bound
pub async fn serve(
    state: Arc<AppState>,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("serving on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("web server stopped");
    Ok(())
}

// --- HTML page ---

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let page = blocking(&state, |state| Ok(page::render(state))).await?;
    Ok(Html(page))
}

#[derive(Deserialize)]
struct AlarmForm {
    hour: u8,
    minute: u8,
    ampm: TimeOfDay,
    #[serde(default)]
    label: String,
    #[serde(default)]
    sound: String,
}

/// Send the browser back to the page, or show what went wrong.
fn back_to_page<T>(result: Result<T>) -> Response {
    match result {
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => (
            status_of(&e),
            Html(page::message("Something went wrong", &e.to_string())),
        )
            .into_response(),
    }
}

async fn submit_alarm(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AlarmForm>,
) -> Response {
    let builder = AlarmBuilder::new(form.hour, form.minute, Some(form.ampm))
        .label(Some(form.label))
        .sound(Some(form.sound))
        .volume(state.config.volume);
    back_to_page(blocking(&state, move |state| state.store.insert(builder)).await)
}

async fn submit_delete(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    back_to_page(blocking(&state, move |state| state.delete(id)).await)
}

async fn submit_toggle(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    let result = blocking(&state, move |state| {
        let alarm = state.store.get(id)?;
        state.set_enabled(id, !alarm.enabled)
    })
    .await;
    back_to_page(result)
}

async fn submit_stop(State(state): State<Arc<AppState>>) -> Redirect {
    state.notifier.stop_all();
    Redirect::to("/")
}

#[derive(Deserialize)]
struct TestForm {
    #[serde(default)]
    sound: String,
}

async fn submit_test(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TestForm>,
) -> Response {
    let sound = Some(form.sound.as_str()).filter(|s| !s.is_empty());
    back_to_page(state.notifier.preview(sound))
}

// --- JSON API ---

async fn list_alarms(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Alarm>>, AppError> {
    let alarms = blocking(&state, |state| Ok(state.store.list())).await?;
    Ok(Json(alarms))
}

#[derive(Deserialize)]
struct NewAlarm {
    hour: u8,
    minute: u8,
    #[serde(default, alias = "meridiem")]
    time_of_day: Option<TimeOfDay>,
    label: Option<String>,
    sound: Option<String>,
    volume: Option<f32>,
}

async fn create_alarm(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<NewAlarm>, JsonRejection>,
) -> Result<(StatusCode, Json<Alarm>), AppError> {
    let Json(body) = body.map_err(|rejection| Error::Validation(rejection.body_text()))?;
    let builder = AlarmBuilder::new(body.hour, body.minute, body.time_of_day)
        .label(body.label)
        .sound(body.sound)
        .volume(body.volume.unwrap_or(state.config.volume));
    let alarm = blocking(&state, move |state| state.store.insert(builder)).await?;
    Ok((StatusCode::CREATED, Json(alarm)))
}

async fn delete_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    blocking(&state, move |state| state.delete(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Alarm>, AppError> {
    let alarm = blocking(&state, move |state| state.set_enabled(id, true)).await?;
    Ok(Json(alarm))
}

async fn disable_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Alarm>, AppError> {
    let alarm = blocking(&state, move |state| state.set_enabled(id, false)).await?;
    Ok(Json(alarm))
}

async fn stop_ringing(State(state): State<Arc<AppState>>) -> StatusCode {
    state.notifier.stop_all();
    StatusCode::NO_CONTENT
}

async fn list_sounds(State(state): State<Arc<AppState>>) -> Json<Vec<Sound>> {
    Json(state.sounds.list())
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let now = chrono::Local::now().naive_local().time();
    Json(json!({
        "now": state.config.format_time(now),
        "ringing": state.notifier.ringing(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::RecordingNotifier;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        _dir: TempDir,
        state: Arc<AppState>,
        notifier: Arc<RecordingNotifier>,
    }

    fn test_app() -> TestApp {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sounds")).unwrap();
        std::fs::write(dir.path().join("sounds/rain.mp3"), b"").unwrap();
        let config = Config {
            alarms_path: dir.path().join("alarms.toml"),
            sounds_dir: dir.path().join("sounds"),
            default_sound: "rain.mp3".to_string(),
            ..Config::default()
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let state = Arc::new(AppState {
            store: Arc::new(AlarmStore::open(&config.alarms_path).unwrap()),
            notifier: notifier.clone(),
            sounds: SoundLibrary::new(&config.sounds_dir, &config.default_sound),
            config,
        });
        TestApp {
            _dir: dir,
            state,
            notifier,
        }
    }

    impl TestApp {
        async fn send(&self, request: Request<Body>) -> Response {
            router(self.state.clone()).oneshot(request).await.unwrap()
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
        }

        async fn post_json(&self, uri: &str, body: &Value) -> Response {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn post_form(&self, uri: &str, body: &str) -> Response {
            self.send(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn list_starts_empty() {
        let app = test_app();
        let response = app.get("/api/alarms").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn create_then_list() {
        let app = test_app();
        let response = app
            .post_json(
                "/api/alarms",
                &json!({"hour": 7, "minute": 30, "meridiem": "AM", "label": "wake up"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["hour"], 7);
        assert_eq!(created["time_of_day"], "AM");
        assert_eq!(created["label"], "wake up");

        let listed = body_json(app.get("/api/alarms").await).await;
        assert_eq!(listed, json!([created]));
    }

    #[tokio::test]
    async fn invalid_time_is_bad_request() {
        let app = test_app();
        let response = app
            .post_json("/api/alarms", &json!({"hour": 13, "minute": 0, "meridiem": "PM"}))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("hour 13"));
        assert!(app.state.store.list().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_error() {
        let app = test_app();
        for body in [
            json!({"hour": 300, "minute": 0}),
            json!({"hour": "x", "minute": 0}),
            json!({"minute": 0}),
        ] {
            let response = app.post_json("/api/alarms", &body).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert!(body_json(response).await["error"].is_string(), "{body}");
        }
        assert!(app.state.store.list().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let app = test_app();
        let response = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/alarms/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(app.notifier.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_and_silences() {
        let app = test_app();
        let alarm = app.state.store.add(6, 0, None, None).unwrap();
        let response = app
            .send(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/alarms/{}", alarm.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(app.state.store.list().is_empty());
        assert_eq!(*app.notifier.stopped.lock().unwrap(), vec![alarm.id]);
    }

    #[tokio::test]
    async fn disable_and_enable() {
        let app = test_app();
        let alarm = app.state.store.add(6, 0, None, None).unwrap();
        let response = app
            .post_json(&format!("/api/alarms/{}/disable", alarm.id), &json!({}))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["enabled"], false);

        let response = app
            .post_json(&format!("/api/alarms/{}/enable", alarm.id), &json!({}))
            .await;
        assert_eq!(body_json(response).await["enabled"], true);

        let response = app.post_json("/api/alarms/99/enable", &json!({})).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn form_add_redirects_home() {
        let app = test_app();
        let response = app
            .post_form("/alarms", "hour=7&minute=5&ampm=PM&label=Tea+%3Cb%3E&sound=")
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let alarms = app.state.store.list();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].hour24(), 19);
        assert_eq!(alarms[0].sound, None);

        let page = body_text(app.get("/").await).await;
        assert!(page.contains("Tea &lt;b&gt;"));
        assert!(page.contains("rain.mp3"));
    }

    #[tokio::test]
    async fn form_add_shows_validation_errors() {
        let app = test_app();
        let response = app.post_form("/alarms", "hour=0&minute=5&ampm=AM").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("outside 1-12"));
    }

    #[tokio::test]
    async fn form_toggle_and_delete() {
        let app = test_app();
        let alarm = app.state.store.add(6, 0, None, None).unwrap();
        let toggle = app
            .post_form(&format!("/alarms/{}/toggle", alarm.id), "")
            .await;
        assert_eq!(toggle.status(), StatusCode::SEE_OTHER);
        assert!(!app.state.store.get(alarm.id).unwrap().enabled);

        app.post_form(&format!("/alarms/{}/delete", alarm.id), "")
            .await;
        assert!(app.state.store.list().is_empty());
    }

    #[tokio::test]
    async fn stop_and_test_reach_the_notifier() {
        let app = test_app();
        let response = app.post_json("/api/stop", &json!({})).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        app.post_form("/stop", "").await;
        assert_eq!(*app.notifier.stop_all_calls.lock().unwrap(), 2);

        app.post_form("/test", "sound=rain.mp3").await;
        app.post_form("/test", "").await;
        assert_eq!(
            *app.notifier.previews.lock().unwrap(),
            vec![Some("rain.mp3".to_string()), None]
        );
    }

    #[tokio::test]
    async fn sounds_and_status() {
        let app = test_app();
        let sounds = body_json(app.get("/api/sounds").await).await;
        assert_eq!(sounds[0]["name"], "rain.mp3");

        let alarm = app.state.store.add(6, 0, None, None).unwrap();
        app.state.notifier.play(&alarm);
        let status = body_json(app.get("/api/status").await).await;
        assert_eq!(status["ringing"], json!([alarm.id]));
        assert!(status["now"].is_string());
    }
}
