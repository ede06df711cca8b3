// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Types shared by the agent and the panel.
//!
//! # Modules
//!
//! - [`auth_types`]: identities, credential schemes and request context
//! - [`clock`]: injectable time sources
//! - [`error`]: authentication and persistence error types

pub mod auth_types;
pub mod clock;
pub mod error;

pub use auth_types::{CredentialScheme, Identity, RequestContext};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::{AuthFailure, MirrorError};
