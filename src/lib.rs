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

//! Connection-gating authentication and IP reputation for a node fleet.
//!
//! The same gate protects two processes: the per-node agent, which accepts a
//! shared secret from the panel, and the panel itself, which accepts an
//! administrator password and issues session tokens.

pub mod server;
pub mod shared;
pub mod utils;
