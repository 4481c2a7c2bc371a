use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveTime, Utc};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod agent;
mod analytics;
mod config;
mod profile;
mod store;
mod tools;

use agent::{Agent, AgentMessage, OpenAiAgent};
use profile::{render_profile_context, FactExtractor, RegexFactExtractor};
use store::{Role, Store};
use tools::Toolset;

/// Fixed recent-history window fed to the agent as context.
const HISTORY_WINDOW: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "campus-admin-server", version, about = "Campus administration backend: student analytics and a record-keeping assistant")]
struct Cli {
	/// Bind address for the HTTP server
	#[arg(long, env = "HTTP_BIND", default_value = "127.0.0.1:8080")]
	bind: String,

	/// Data directory root
	#[arg(long, env = "DATA_DIR", default_value = "./data")]
	data_dir: String,
}

struct AppState {
	store: Store,
	agent: Arc<dyn Agent>,
	extractor: Box<dyn FactExtractor>,
}

#[derive(Deserialize)]
struct ChatRequest {
	user_input: String,
}

#[derive(Deserialize)]
struct ChatParams {
	thread_id: Option<String>,
}

#[derive(Deserialize)]
struct RecentParams {
	limit: Option<usize>,
}

#[inline]
fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>, details: Option<serde_json::Value>) -> Response {
	let body = serde_json::json!({ "error": { "code": code, "message": message.into(), "details": details } });
	(status, Json(body)).into_response()
}

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing();
	let env_cfg = config::Config::load()?;
	let cli = Cli::parse();

	let data_dir = if cli.data_dir != "./data" { cli.data_dir.clone() } else { env_cfg.data_dir.clone() };
	let bind_addr: std::net::SocketAddr = if cli.bind != "127.0.0.1:8080" { cli.bind.parse().context("invalid bind address")? } else { env_cfg.bind };

	let store = Store::open(&data_dir)?;
	let tools = Toolset::with_default_faq(store.clone(), &data_dir);
	let agent: Arc<dyn Agent> = Arc::new(OpenAiAgent::new(&env_cfg.agent, tools));
	let state = Arc::new(AppState {
		store,
		agent,
		extractor: Box::new(RegexFactExtractor::new()),
	});

	info!(%bind_addr, "Starting HTTP server");
	let app = build_router(state);
	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;
	Ok(())
}

fn init_tracing() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = fmt::layer().with_target(false).with_ansi(false).with_writer(std::io::stderr);
	tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

async fn shutdown_signal() {
	let _ = signal::ctrl_c().await;
	info!("Shutdown signal received");
}

fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/thread", post(create_thread))
		.route("/threads", get(list_threads))
		.route("/thread/:id", delete(delete_thread))
		.route("/chat", post(chat))
		.route("/analytics/total-students", get(total_students))
		.route("/analytics/students-by-department", get(students_by_department))
		.route("/analytics/students/recent", get(recent_students))
		.route("/analytics/students/active_last_7_days", get(active_last_7_days))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn health() -> Json<serde_json::Value> {
	Json(json!({ "status": "ok" }))
}

async fn create_thread(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Response {
	match state.store.create_thread("Thread created") {
		Ok((thread_id, _)) => Json(json!({ "thread_id": thread_id, "message": "New thread created successfully" })).into_response(),
		Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), None),
	}
}

async fn list_threads(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Response {
	match build_thread_list(&state.store) {
		Ok(threads) => Json(json!({ "threads": threads })).into_response(),
		Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), None),
	}
}

fn build_thread_list(store: &Store) -> Result<Vec<serde_json::Value>> {
	let mut out = Vec::new();
	for marker in store.system_markers()? {
		let first_user_msg = store.first_user_message(&marker.thread_id)?.map(|m| m.content);
		out.push(json!({
			"thread_id": marker.thread_id,
			"created": marker.timestamp.to_rfc3339(),
			"firstUserMsg": first_user_msg,
		}));
	}
	Ok(out)
}

async fn delete_thread(
	axum::extract::State(state): axum::extract::State<Arc<AppState>>,
	axum::extract::Path(thread_id): axum::extract::Path<String>,
) -> Response {
	match state.store.delete_thread(&thread_id) {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), None),
	}
}

async fn chat(
	axum::extract::State(state): axum::extract::State<Arc<AppState>>,
	axum::extract::Query(params): axum::extract::Query<ChatParams>,
	Json(req): Json<ChatRequest>,
) -> Response {
	let user_text = req.user_input.trim().to_string();
	if user_text.is_empty() {
		return json_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", "User input cannot be empty.", None);
	}
	match run_chat_turn(&state, params.thread_id, &user_text).await {
		Ok(out) => Json(out).into_response(),
		Err(err) => json_error(
			StatusCode::INTERNAL_SERVER_ERROR,
			"INTERNAL_ERROR",
			format!("Error processing request: {}", err),
			None,
		),
	}
}

// One conversational turn. Linear pipeline; the first failing step aborts
// the rest. Writes are non-transactional: a persisted user message is not
// retracted if the agent call fails afterwards.
async fn run_chat_turn(state: &AppState, explicit_thread: Option<String>, user_text: &str) -> Result<serde_json::Value> {
	// An explicit id is used as-is, no existence check; chatting on an unknown
	// id lazily creates history under it.
	let thread_id = match explicit_thread.filter(|t| !t.is_empty()) {
		Some(t) => t,
		None => match state.store.latest_thread()? {
			Some(t) => t,
			None => state.store.create_thread("Thread created automatically")?.0,
		},
	};

	state.store.append_message(&thread_id, Role::User, user_text)?;

	// Extraction runs on the raw text, never the profile-augmented variant.
	let update = state.extractor.extract(user_text);
	if !update.is_empty() {
		state.store.upsert_profile(&thread_id, &update)?;
	}

	let history: Vec<AgentMessage> = state
		.store
		.recent_history(&thread_id, HISTORY_WINDOW)?
		.into_iter()
		.map(|m| AgentMessage { role: m.role, content: m.content })
		.collect();

	let profile_text = render_profile_context(state.store.get_profile(&thread_id)?.as_ref());
	let instruction = if profile_text.is_empty() {
		user_text.to_string()
	} else {
		format!("{} {}", profile_text, user_text)
	};

	let reply = state.agent.reply(&instruction, &history).await?;

	state.store.append_message(&thread_id, Role::Assistant, &reply)?;

	let history = state.store.full_history(&thread_id)?;
	Ok(json!({ "thread_id": thread_id, "response": reply, "history": history }))
}

async fn total_students(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Response {
	match state.store.count_students() {
		Ok(total) => Json(json!({ "total_students": total, "as_of": Utc::now() })).into_response(),
		Err(err) => json_error(
			StatusCode::INTERNAL_SERVER_ERROR,
			"INTERNAL_ERROR",
			format!("Failed to fetch total students: {}", err),
			None,
		),
	}
}

async fn students_by_department(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Response {
	match state.store.department_counts() {
		Ok(raw) => {
			let results = analytics::merge_department_counts(&raw);
			let total_students: u64 = results.iter().map(|r| r.count).sum();
			Json(json!({
				"results": results,
				"total_departments": results.len(),
				"total_students": total_students,
				"as_of": Utc::now(),
			}))
			.into_response()
		}
		Err(err) => json_error(
			StatusCode::INTERNAL_SERVER_ERROR,
			"INTERNAL_ERROR",
			format!("Failed to fetch students by department: {}", err),
			None,
		),
	}
}

async fn recent_students(
	axum::extract::State(state): axum::extract::State<Arc<AppState>>,
	axum::extract::Query(params): axum::extract::Query<RecentParams>,
) -> Response {
	let limit = params.limit.unwrap_or(5).clamp(1, 50);
	match state.store.recent_students(limit) {
		Ok(students) => Json(json!({ "count": students.len(), "students": students })).into_response(),
		Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), None),
	}
}

async fn active_last_7_days(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Response {
	let days = analytics::last_seven_days(Utc::now().date_naive());
	let since = days[0].and_time(NaiveTime::MIN).and_utc();
	match state.store.daily_active_counts(since) {
		Ok(counts) => {
			let (labels, data) = analytics::activity_histogram(&days, &counts);
			Json(json!({ "days": labels, "data": data })).into_response()
		}
		Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string(), None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::{Path as AxPath, Query as AxQuery, State as AxState};
	use std::sync::Mutex as StdMutex;
	use tempfile::TempDir;

	struct StubAgent {
		canned: String,
		seen: StdMutex<Vec<String>>,
	}

	impl StubAgent {
		fn new(canned: &str) -> Self {
			Self { canned: canned.to_string(), seen: StdMutex::new(Vec::new()) }
		}
	}

	#[async_trait::async_trait]
	impl Agent for StubAgent {
		async fn reply(&self, instruction: &str, _history: &[AgentMessage]) -> Result<String> {
			self.seen.lock().unwrap().push(instruction.to_string());
			Ok(self.canned.clone())
		}
	}

	fn make_state(reply: &str) -> (Arc<AppState>, Arc<StubAgent>, TempDir) {
		let dir = TempDir::new().unwrap();
		let store = Store::open(dir.path().to_str().unwrap()).unwrap();
		let stub = Arc::new(StubAgent::new(reply));
		let state = Arc::new(AppState {
			store,
			agent: stub.clone(),
			extractor: Box::new(RegexFactExtractor::new()),
		});
		(state, stub, dir)
	}

	#[tokio::test]
	async fn test_chat_turn_end_to_end() {
		let (state, stub, _dir) = make_state("Nice to meet you, Sam!");
		let resp = create_thread(AxState(state.clone())).await;
		assert_eq!(resp.status(), StatusCode::OK);
		let thread_id = state.store.system_markers().unwrap()[0].thread_id.clone();

		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
			Json(ChatRequest { user_input: "my name is Sam".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::OK);

		let history = state.store.full_history(&thread_id).unwrap();
		let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
		assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
		assert_eq!(history[1].content, "my name is Sam");
		assert_eq!(history[2].content, "Nice to meet you, Sam!");

		let profile = state.store.get_profile(&thread_id).unwrap().unwrap();
		assert_eq!(profile.name.as_deref(), Some("Sam"));

		// Profile facts extracted this turn are already injected into the
		// instruction the agent sees.
		let seen = stub.seen.lock().unwrap();
		assert!(seen[0].starts_with("The user's name is Sam."));
		assert!(seen[0].ends_with("my name is Sam"));
	}

	#[tokio::test]
	async fn test_chat_without_thread_id_creates_one_thread() {
		let (state, _stub, _dir) = make_state("hello");
		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: None }),
			Json(ChatRequest { user_input: "hi there".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::OK);

		let markers = state.store.system_markers().unwrap();
		assert_eq!(markers.len(), 1);
		assert_eq!(markers[0].content, "Thread created automatically");

		// A second turn reuses the same thread instead of creating another.
		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: None }),
			Json(ChatRequest { user_input: "still here".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::OK);
		assert_eq!(state.store.system_markers().unwrap().len(), 1);
		assert_eq!(state.store.full_history(&markers[0].thread_id).unwrap().len(), 5);
	}

	#[tokio::test]
	async fn test_empty_input_rejected_before_any_write() {
		let (state, _stub, _dir) = make_state("unused");
		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: None }),
			Json(ChatRequest { user_input: "   ".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
		// No thread was auto-created and nothing was persisted.
		assert!(state.store.system_markers().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_delete_thread_cascades_and_is_idempotent() {
		let (state, _stub, _dir) = make_state("ok");
		let _ = create_thread(AxState(state.clone())).await;
		let thread_id = state.store.system_markers().unwrap()[0].thread_id.clone();
		let _ = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
			Json(ChatRequest { user_input: "my name is Alice".to_string() }),
		)
		.await;
		assert!(state.store.get_profile(&thread_id).unwrap().is_some());

		let resp = delete_thread(AxState(state.clone()), AxPath(thread_id.clone())).await;
		assert_eq!(resp.status(), StatusCode::NO_CONTENT);
		assert!(state.store.full_history(&thread_id).unwrap().is_empty());
		assert!(state.store.get_profile(&thread_id).unwrap().is_none());
		assert!(build_thread_list(&state.store).unwrap().is_empty());

		// Deleting again is a no-op, not an error.
		let resp = delete_thread(AxState(state.clone()), AxPath(thread_id)).await;
		assert_eq!(resp.status(), StatusCode::NO_CONTENT);
	}

	#[tokio::test]
	async fn test_chat_with_unknown_thread_id_lazily_creates_history() {
		let (state, _stub, _dir) = make_state("noted");
		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some("imported-session-42".to_string()) }),
			Json(ChatRequest { user_input: "hello there".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::OK);

		// The explicit id is used as-is; history accrues under it without a
		// system marker and no other thread is created.
		let history = state.store.full_history("imported-session-42").unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[0].role, Role::User);
		assert_eq!(history[1].role, Role::Assistant);
		assert!(state.store.system_markers().unwrap().is_empty());
		assert!(build_thread_list(&state.store).unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_thread_ids_with_colon_stay_isolated() {
		let (state, _stub, _dir) = make_state("ok");
		state.store.append_message("alpha:beta", Role::User, "nested thread").unwrap();
		state.store.append_message("alpha", Role::User, "plain thread").unwrap();

		let history = state.store.full_history("alpha").unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].content, "plain thread");
		assert!(history.iter().all(|m| m.thread_id == "alpha"));
		assert_eq!(state.store.recent_history("alpha", HISTORY_WINDOW).unwrap().len(), 1);

		// Cascade delete of "alpha" must not reach into "alpha:beta".
		state.store.delete_thread("alpha").unwrap();
		assert!(state.store.full_history("alpha").unwrap().is_empty());
		let other = state.store.full_history("alpha:beta").unwrap();
		assert_eq!(other.len(), 1);
		assert_eq!(other[0].content, "nested thread");
	}

	#[tokio::test]
	async fn test_list_threads_newest_first_with_first_user_msg() {
		let (state, _stub, _dir) = make_state("ok");
		let (old_thread, _) = state.store.create_thread("Thread created").unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		let (new_thread, _) = state.store.create_thread("Thread created").unwrap();
		let _ = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some(old_thread.clone()) }),
			Json(ChatRequest { user_input: "first question".to_string() }),
		)
		.await;

		let threads = build_thread_list(&state.store).unwrap();
		assert_eq!(threads.len(), 2);
		assert_eq!(threads[0]["thread_id"], json!(new_thread));
		assert_eq!(threads[0]["firstUserMsg"], serde_json::Value::Null);
		assert_eq!(threads[1]["thread_id"], json!(old_thread));
		assert_eq!(threads[1]["firstUserMsg"], json!("first question"));
	}

	#[tokio::test]
	async fn test_profile_upsert_is_additive() {
		let (state, _stub, _dir) = make_state("noted");
		let (thread_id, _) = state.store.create_thread("Thread created").unwrap();
		for input in ["my name is Alice", "I am a teacher"] {
			let resp = chat(
				AxState(state.clone()),
				AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
				Json(ChatRequest { user_input: input.to_string() }),
			)
			.await;
			assert_eq!(resp.status(), StatusCode::OK);
		}
		let profile = state.store.get_profile(&thread_id).unwrap().unwrap();
		assert_eq!(profile.name.as_deref(), Some("Alice"));
		assert_eq!(profile.profession.as_deref(), Some("teacher"));

		// A turn matching neither pattern clears nothing.
		let _ = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
			Json(ChatRequest { user_input: "how many students are enrolled?".to_string() }),
		)
		.await;
		let profile = state.store.get_profile(&thread_id).unwrap().unwrap();
		assert_eq!(profile.name.as_deref(), Some("Alice"));
		assert_eq!(profile.profession.as_deref(), Some("teacher"));
	}

	#[test]
	fn test_render_profile_context_variants() {
		assert_eq!(render_profile_context(None), "");
		let name_only = store::Profile {
			thread_id: "t".to_string(),
			name: Some("Alice".to_string()),
			profession: None,
		};
		assert_eq!(render_profile_context(Some(&name_only)), "The user's name is Alice.");
		let full = store::Profile {
			thread_id: "t".to_string(),
			name: Some("Alice".to_string()),
			profession: Some("teacher".to_string()),
		};
		assert_eq!(
			render_profile_context(Some(&full)),
			"The user's name is Alice. The user's profession is teacher."
		);
	}

	#[tokio::test]
	async fn test_recent_history_window_is_bounded() {
		let (state, _stub, _dir) = make_state("ok");
		let (thread_id, _) = state.store.create_thread("Thread created").unwrap();
		for i in 0..15 {
			state.store.append_message(&thread_id, Role::User, &format!("msg {}", i)).unwrap();
		}
		let recent = state.store.recent_history(&thread_id, HISTORY_WINDOW).unwrap();
		assert_eq!(recent.len(), 10);
		assert_eq!(recent[0].content, "msg 5");
		assert_eq!(recent[9].content, "msg 14");
		// Chronological order throughout.
		for pair in recent.windows(2) {
			assert!(pair[0].timestamp <= pair[1].timestamp);
		}
	}

	#[tokio::test]
	async fn test_department_normalization_merges_buckets() {
		let (state, _stub, _dir) = make_state("ok");
		for dept in ["cs", "Computer Science", "computer_science"] {
			state.store.insert_student("s", None, Some(dept.to_string())).unwrap();
		}
		state.store.insert_student("nodept", None, None).unwrap();
		state.store.insert_student("phys", None, Some("physics".to_string())).unwrap();

		let raw = state.store.department_counts().unwrap();
		let results = analytics::merge_department_counts(&raw);
		let cs = results.iter().find(|r| r.department == "Computer Science").unwrap();
		assert_eq!(cs.count, 3);
		assert!(results.iter().any(|r| r.department == "Unknown" && r.count == 1));
		assert!(results.iter().any(|r| r.department == "Physics" && r.count == 1));
		assert_eq!(results.len(), 3);
		// Largest bucket sorts first.
		assert_eq!(results[0].department, "Computer Science");

		let resp = students_by_department(AxState(state.clone())).await;
		assert_eq!(resp.status(), StatusCode::OK);
	}

	#[test]
	fn test_canonical_department_edge_values() {
		assert_eq!(analytics::canonical_department(None), "Unknown");
		assert_eq!(analytics::canonical_department(Some("   ")), "Unknown");
		assert_eq!(analytics::canonical_department(Some("AI/ML")), "Artificial Intelligence");
		assert_eq!(analytics::canonical_department(Some("se")), "Software Engineering");
		assert_eq!(analytics::canonical_department(Some("data  science")), "Data Science");
	}

	#[tokio::test]
	async fn test_active_last_7_days_zero_filled() {
		let (state, _stub, _dir) = make_state("ok");
		state.store.insert_student("a", None, None).unwrap();
		state.store.insert_student("b", None, None).unwrap();

		let days = analytics::last_seven_days(Utc::now().date_naive());
		assert_eq!(days.len(), 7);
		let since = days[0].and_time(NaiveTime::MIN).and_utc();
		let counts = state.store.daily_active_counts(since).unwrap();
		let (labels, data) = analytics::activity_histogram(&days, &counts);
		assert_eq!(labels.len(), 7);
		assert_eq!(data.len(), 7);
		// Both students were active today, the final bucket; all earlier
		// days are zero-filled.
		assert_eq!(data[6].count, 2);
		for bucket in &data[..6] {
			assert_eq!(bucket.count, 0);
		}

		let resp = active_last_7_days(AxState(state.clone())).await;
		assert_eq!(resp.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_recent_students_limit_clamped() {
		let (state, _stub, _dir) = make_state("ok");
		for i in 0..8 {
			state.store.insert_student(&format!("s{}", i), None, None).unwrap();
			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
		}
		let recent = state.store.recent_students(3).unwrap();
		assert_eq!(recent.len(), 3);
		assert_eq!(recent[0].name, "s7");

		let resp = recent_students(AxState(state.clone()), AxQuery(RecentParams { limit: Some(500) })).await;
		assert_eq!(resp.status(), StatusCode::OK);
		let resp = recent_students(AxState(state.clone()), AxQuery(RecentParams { limit: None })).await;
		assert_eq!(resp.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_toolset_student_crud_and_faq() {
		let (state, _stub, _dir) = make_state("ok");
		let toolset = Toolset::with_default_faq(state.store.clone(), "/nonexistent");

		let created = toolset
			.dispatch("add_student", &json!({"name": "Jo", "department": "cs"}))
			.unwrap();
		let id = created["student"]["id"].as_str().unwrap().to_string();

		let listed = toolset.dispatch("read_students", &json!({})).unwrap();
		assert_eq!(listed["count"], json!(1));

		let updated = toolset
			.dispatch("update_student", &json!({"id": id, "email": "jo@campus.edu"}))
			.unwrap();
		assert_eq!(updated["updated"], json!(true));
		assert_eq!(updated["student"]["email"], json!("jo@campus.edu"));

		let fetched = toolset.dispatch("read_student_by_id", &json!({"id": id})).unwrap();
		assert_eq!(fetched["name"], json!("Jo"));

		let faq = toolset.dispatch("campus_faq", &json!({"query": "when does the library open?"})).unwrap();
		assert!(faq["answer"].as_str().unwrap().contains("library"));
		let miss = toolset.dispatch("campus_faq", &json!({"query": "zzzzzz"})).unwrap();
		assert!(miss["answer"].is_null());

		let deleted = toolset.dispatch("delete_student", &json!({"id": id})).unwrap();
		assert_eq!(deleted["deleted"], json!(true));
		assert!(toolset.dispatch("unknown_tool", &json!({})).is_err());
	}

	#[tokio::test]
	async fn test_agent_failure_keeps_user_message() {
		struct FailingAgent;
		#[async_trait::async_trait]
		impl Agent for FailingAgent {
			async fn reply(&self, _instruction: &str, _history: &[AgentMessage]) -> Result<String> {
				Err(anyhow::anyhow!("model unavailable"))
			}
		}
		let dir = TempDir::new().unwrap();
		let store = Store::open(dir.path().to_str().unwrap()).unwrap();
		let state = Arc::new(AppState {
			store,
			agent: Arc::new(FailingAgent),
			extractor: Box::new(RegexFactExtractor::new()),
		});
		let (thread_id, _) = state.store.create_thread("Thread created").unwrap();
		let resp = chat(
			AxState(state.clone()),
			AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
			Json(ChatRequest { user_input: "hello".to_string() }),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
		// At-least-once: the user message persisted before the failure stays.
		let history = state.store.full_history(&thread_id).unwrap();
		assert_eq!(history.len(), 2);
		assert_eq!(history[1].role, Role::User);
	}

	#[tokio::test]
	async fn test_fuzz_chat_input_validation() {
		use rand::{distributions::Alphanumeric, Rng};
		let (state, _stub, _dir) = make_state("ok");
		let (thread_id, _) = state.store.create_thread("Thread created").unwrap();
		let mut rng = rand::thread_rng();
		for _ in 0..50 {
			let len: usize = rng.gen_range(0..256);
			let input: String = (0..len).map(|_| rng.sample(Alphanumeric) as char).collect();
			let resp = chat(
				AxState(state.clone()),
				AxQuery(ChatParams { thread_id: Some(thread_id.clone()) }),
				Json(ChatRequest { user_input: input.clone() }),
			)
			.await;
			if input.trim().is_empty() {
				assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
			} else {
				assert_eq!(resp.status(), StatusCode::OK);
			}
		}
	}

	#[test]
	fn test_fact_extractor_patterns() {
		let extractor = RegexFactExtractor::new();
		let both = extractor.extract("Hi, my name is Alice Smith and I am an engineer");
		assert_eq!(both.name.as_deref(), Some("Alice Smith and I am an engineer"));
		assert_eq!(both.profession.as_deref(), Some("engineer"));

		let neither = extractor.extract("what are the library hours?");
		assert!(neither.is_empty());

		let case_insensitive = extractor.extract("MY NAME IS bob");
		assert_eq!(case_insensitive.name.as_deref(), Some("bob"));
	}
}
