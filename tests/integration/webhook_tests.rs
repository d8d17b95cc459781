//! Plugin approvers reached over HTTP, against an in-process stub server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use approver_policy::approver::registry::Registry;
use approver_policy::approver::webhook::{
    EvaluateReply, PluginResult, ReadyReply, WebhookApprover,
};
use approver_policy::approver::Approver;
use approver_policy::engine::combiner::{DecisionCombiner, DecisionOutcome};
use approver_policy::engine::context::DecisionContext;
use approver_policy::models::policy::Policy;
use approver_policy::models::verdict::EvaluationVerdict;
use approver_policy::AppError;

use super::test_helpers::{allow_all, namespace, policy, ready, request};

#[derive(Clone)]
struct PluginStub {
    ready: Arc<Mutex<ReadyReply>>,
    evaluate: Arc<Mutex<EvaluateReply>>,
    failing: Arc<Mutex<bool>>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl PluginStub {
    fn new() -> Self {
        Self {
            ready: Arc::new(Mutex::new(ReadyReply {
                ready: true,
                message: String::new(),
                recheck_after_millis: None,
            })),
            evaluate: Arc::new(Mutex::new(EvaluateReply {
                result: PluginResult::NotDenied,
                message: String::new(),
            })),
            failing: Arc::new(Mutex::new(false)),
            last_body: Arc::new(Mutex::new(None)),
        }
    }

    fn last_body(&self) -> Value {
        self.last_body.lock().unwrap().clone().expect("plugin was called")
    }
}

async fn ready_handler(State(stub): State<PluginStub>, Json(body): Json<Value>) -> Response {
    *stub.last_body.lock().unwrap() = Some(body);
    if *stub.failing.lock().unwrap() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let reply = stub.ready.lock().unwrap().clone();
    Json(reply).into_response()
}

async fn evaluate_handler(State(stub): State<PluginStub>, Json(body): Json<Value>) -> Response {
    *stub.last_body.lock().unwrap() = Some(body);
    if *stub.failing.lock().unwrap() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let reply = stub.evaluate.lock().unwrap().clone();
    Json(reply).into_response()
}

/// Serve the stub on an ephemeral port; returns its base URL.
async fn serve(stub: PluginStub) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/ready", post(ready_handler))
        .route("/evaluate", post(evaluate_handler))
        .with_state(stub);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server");
    });
    format!("http://{addr}/")
}

fn plugin_policy(name: &str) -> Policy {
    let mut p = policy(name);
    p.spec
        .plugins
        .insert("stub".into(), json!({"zone": "eu-west"}));
    p
}

fn ctx() -> DecisionContext {
    DecisionContext::with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn readiness_reply_is_passed_through() {
    let stub = PluginStub::new();
    *stub.ready.lock().unwrap() = ReadyReply {
        ready: false,
        message: "syncing".into(),
        recheck_after_millis: Some(50),
    };
    let url = serve(stub.clone()).await;
    let approver = WebhookApprover::new("stub", url, Duration::from_secs(2)).expect("client");

    let verdict = approver.ready(&plugin_policy("p")).await.expect("ready");
    assert!(!verdict.ready);
    assert_eq!(verdict.message, "syncing");
    assert_eq!(verdict.recheck_after, Some(Duration::from_millis(50)));

    let body = stub.last_body();
    assert_eq!(body["config"], json!({"zone": "eu-west"}));
    assert_eq!(body["policy"]["name"], "p");
}

#[tokio::test]
async fn evaluation_sends_request_and_reports_denial() {
    let stub = PluginStub::new();
    *stub.evaluate.lock().unwrap() = EvaluateReply {
        result: PluginResult::Denied,
        message: "key too weak".into(),
    };
    let url = serve(stub.clone()).await;
    let approver = WebhookApprover::new("stub", url, Duration::from_secs(2)).expect("client");

    let verdict = approver
        .evaluate(&plugin_policy("p"), &request("ns", "cr"))
        .await
        .expect("evaluate");
    assert_eq!(verdict, EvaluationVerdict::Denied("key too weak".into()));

    let body = stub.last_body();
    assert_eq!(body["request"]["name"], "cr");
    assert_eq!(body["request"]["namespace"], "ns");
    assert_eq!(body["config"]["zone"], "eu-west");
}

#[tokio::test]
async fn server_error_is_an_approver_failure() {
    let stub = PluginStub::new();
    *stub.failing.lock().unwrap() = true;
    let url = serve(stub).await;
    let approver = WebhookApprover::new("stub", url, Duration::from_secs(2)).expect("client");

    let err = approver
        .evaluate(&plugin_policy("p"), &request("ns", "cr"))
        .await
        .expect_err("500");
    match err {
        AppError::Approver(msg) => assert!(msg.contains("500"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_plugin_is_retryable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let approver = WebhookApprover::new("stub", format!("http://{addr}"), Duration::from_secs(1))
        .expect("client");
    let err = approver.ready(&plugin_policy("p")).await.expect_err("refused");
    assert!(matches!(err, AppError::Approver(_)), "{err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn plugin_denial_decides_through_the_combiner() {
    let stub = PluginStub::new();
    *stub.evaluate.lock().unwrap() = EvaluateReply {
        result: PluginResult::Denied,
        message: "key too weak".into(),
    };
    let url = serve(stub).await;
    let approver = WebhookApprover::new("stub", url, Duration::from_secs(2)).expect("client");
    let registry = Registry::with_builtins().with_plugin(Arc::new(approver));
    let combiner = DecisionCombiner::new(Arc::new(registry), Arc::new(allow_all()));

    let out = combiner
        .decide(
            &request("ns", "cr"),
            &[ready(plugin_policy("p"))],
            &namespace("ns"),
            &ctx(),
        )
        .await
        .expect("decide");
    assert_eq!(
        out,
        DecisionOutcome::Denied {
            message: "Denied by CertificateRequestPolicy \"p\": stub: key too weak".into(),
            policy: "p".into(),
        }
    );
}
