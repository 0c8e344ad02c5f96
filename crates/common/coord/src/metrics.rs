// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::LazyLock;

use prometheus::{
    IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec,
};

pub const COMPONENT_LABEL: &str = "component";
pub const DIRECTION_LABEL: &str = "direction";
pub const OUTCOME_LABEL: &str = "outcome";

pub static LOCK_ACQUIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("wharf_lock_acquired_total", "Total number of locks acquired").unwrap()
});

pub static LOCK_CONTENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_lock_contended_total",
        "Total number of acquisition attempts that found the lock taken"
    )
    .unwrap()
});

pub static LOCK_TIMEOUTS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_lock_timeouts_total",
        "Total number of acquisitions that gave up after retrying"
    )
    .unwrap()
});

pub static LOCK_LOST: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_lock_lost_total",
        "Total number of held locks found expired or taken by another owner"
    )
    .unwrap()
});

pub static POWER_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_power_transitions_total",
        "Total number of completed lifecycle transitions",
        &[COMPONENT_LABEL, DIRECTION_LABEL, OUTCOME_LABEL]
    )
    .unwrap()
});

pub static TICKS_FIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("wharf_ticks_fired_total", "Total number of ticker callbacks run").unwrap()
});

pub static TICKS_SKIPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_ticks_skipped_total",
        "Total number of ticks skipped because the previous callback overran"
    )
    .unwrap()
});
