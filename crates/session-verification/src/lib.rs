// Copyright 2024 The Matrix.org Foundation C.I.C.
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
// See the License for that specific language governing permissions and
// limitations under the License.

#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations)]

mod config;
mod error;
mod relay;

pub mod incoming;
pub mod outgoing;
pub mod service;
pub mod timeout;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use self::{
    config::{VerificationSettings, DEFAULT_BACKUP_RESTORE_TIMEOUT},
    error::{Error, Result, ServiceError},
    incoming::IncomingVerification,
    outgoing::OutgoingVerification,
};

