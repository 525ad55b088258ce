// Copyright 2024 The Kubernetes Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A plain HTTP webhook backend for tests.

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;

/// Paths served by [`start`].
pub const ALLOW: &str = "/allow";
pub const DISALLOW: &str = "/disallow";
pub const DISALLOW_REASON: &str = "/disallowReason";
pub const INTERNAL_ERR: &str = "/internalErr";
pub const INVALID_RESP: &str = "/invalidResp";

fn review_response(body: &Bytes, response: Value) -> Response {
    let review: Value = match serde_json::from_slice(body) {
        Ok(review) => review,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let uid = review["request"]["uid"].clone();
    let mut response = response;
    response["uid"] = uid;
    Json(json!({
        "apiVersion": review["apiVersion"],
        "kind": "AdmissionReview",
        "response": response,
    }))
    .into_response()
}

async fn allow(body: Bytes) -> Response {
    review_response(&body, json!({"allowed": true}))
}

async fn disallow(body: Bytes) -> Response {
    review_response(&body, json!({"allowed": false, "status": {"code": 403}}))
}

async fn disallow_reason(body: Bytes) -> Response {
    review_response(
        &body,
        json!({"allowed": false, "status": {"code": 403, "message": "you shall not pass"}}),
    )
}

async fn internal_err() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "webhook exploded").into_response()
}

async fn invalid_resp() -> Response {
    (StatusCode::OK, "invalid response").into_response()
}

/// Starts the server on an ephemeral port and returns its address. The
/// server lives until the test runtime shuts down.
pub async fn start() -> SocketAddr {
    let app = Router::new()
        .route(ALLOW, post(allow))
        .route(DISALLOW, post(disallow))
        .route(DISALLOW_REASON, post(disallow_reason))
        .route(INTERNAL_ERR, post(internal_err))
        .route(INVALID_RESP, post(invalid_resp));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}
