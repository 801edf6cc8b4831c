// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The human-facing interaction page: `GET /r/{request_id}/` renders the
//! question and its controls, `POST /r/{request_id}/submit` records the
//! one permitted answer (spec §4.F, §4.G).
//!
//! Server-rendered HTML with no client-side framework, matching the
//! teacher's own terminal-first bias toward minimal markup over a JS
//! build step — the page needs exactly one interaction (click a button
//! or submit a line of text), which plain HTML forms already do.

use axum::extract::{Form, Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::engine;
use crate::error::AskError;
use crate::mcd::ControlDescription;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(rename = "k")]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitForm {
    pub action: Option<String>,
    pub text: Option<String>,
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_controls(request_id: &str, token: &str, controls: &ControlDescription) -> String {
    let mut html = String::new();

    for button in &controls.buttons {
        html.push_str(&format!(
            "<form method=\"post\" action=\"/r/{request_id}/submit?k={token}\" style=\"display:inline\">\
             <input type=\"hidden\" name=\"action\" value=\"{value}\">\
             <button type=\"submit\">{label}</button></form>\n",
            request_id = escape_html(request_id),
            token = escape_html(token),
            value = escape_html(&button.value),
            label = escape_html(&button.label),
        ));
    }

    if let Some(input) = &controls.input {
        html.push_str(&format!(
            "<form method=\"post\" action=\"/r/{request_id}/submit?k={token}\">\
             <label for=\"{name}\">{label}</label>\
             <input type=\"text\" id=\"{name}\" name=\"text\">\
             <button type=\"submit\">{submit}</button></form>\n",
            request_id = escape_html(request_id),
            token = escape_html(token),
            name = escape_html(&input.name),
            label = escape_html(&input.label),
            submit = escape_html(&input.submit),
        ));
    }

    html
}

fn render_page(title: &str, body: &str, inner: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head><body>\
         <h1>{title}</h1><p>{body}</p>{inner}</body></html>",
        title = escape_html(title),
        body = escape_html(body),
    ))
}

pub async fn show_page(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let Some(token) = query.token else {
        return AskError::Forbidden.into_response();
    };

    let token_hash = crate::ids::hash_token(&token);
    let now = chrono::Utc::now();
    let valid = match state.store.verify_token(&request_id, &token_hash, now).await {
        Ok(valid) => valid,
        Err(err) => {
            tracing::error!(err = %err, request_id = %request_id, "failed to verify token for page render");
            return AskError::Internal.into_response();
        }
    };
    if !valid {
        return AskError::Forbidden.into_response();
    }

    let display = match state.store.read_request_display_fields(&request_id).await {
        Ok(Some(display)) => display,
        Ok(None) => return AskError::NotFound.into_response(),
        Err(err) => {
            tracing::error!(err = %err, request_id = %request_id, "failed to read request for page render");
            return AskError::Internal.into_response();
        }
    };

    if display.status.is_terminal() {
        return render_page(&display.title, &display.body, "<p><em>Submitted.</em></p>").into_response();
    }

    engine::record_page_loaded(&state.store, &state.hub, &request_id).await;

    let controls = engine::parse_controls(&display.mcd);
    let inner = render_controls(&request_id, &token, &controls);
    render_page(&display.title, &display.body, &inner).into_response()
}

pub async fn submit_page(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Query(query): Query<PageQuery>,
    Form(form): Form<SubmitForm>,
) -> Response {
    let Some(token) = query.token else {
        return AskError::Forbidden.into_response();
    };

    let outcome = engine::submit(
        &state.store,
        &state.hub,
        &request_id,
        &token,
        form.action.as_deref(),
        form.text.as_deref(),
    )
    .await;

    match outcome {
        Ok(_) => {
            let redirect_url = format!("/r/{request_id}/?k={token}");
            Redirect::to(&redirect_url).into_response()
        }
        Err(err) => err.into_response(),
    }
}
