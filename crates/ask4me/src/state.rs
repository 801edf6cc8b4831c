// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state handed to every HTTP handler (spec §5: "the
//! store, hub, and config are passed explicitly to all handlers; no
//! ambient singletons"). Mirrors the teacher's `MuxState`, minus the
//! mutable session registry — this service's only shared mutable
//! resources are the store and the hub, both already safe under
//! concurrent access by their own contracts.

use std::sync::Arc;

use crate::config::AskConfig;
use crate::hub::Hub;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hub: Hub,
    pub config: Arc<AskConfig>,
}
