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
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, register_histogram_vec,
    register_int_counter, register_int_counter_vec, register_int_gauge_vec,
};

pub const WORKER_LABEL: &str = "worker";
pub const OUTCOME_LABEL: &str = "outcome";

pub static WORKER_STARTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_worker_started_total",
        "Total number of worker startups",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static WORKER_STOPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_worker_stopped_total",
        "Total number of worker shutdowns",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static WORKER_ACTIVE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "wharf_worker_active",
        "Number of running instances per worker",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static WORKER_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_worker_runs_total",
        "Total number of worker run() executions",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static WORKER_RUN_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_worker_run_errors_total",
        "Total number of failed worker run() executions",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static WORKER_RUN_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "wharf_worker_run_duration_seconds",
        "Worker run() duration in seconds",
        &[WORKER_LABEL]
    )
    .unwrap()
});

pub static POOL_STARTUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "wharf_pool_startups_total",
        "Total number of pool startups",
        &[OUTCOME_LABEL]
    )
    .unwrap()
});

pub static POOL_ROLLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_pool_rollbacks_total",
        "Total number of members brought back down after a failed pool startup"
    )
    .unwrap()
});

pub static POOL_HUNG_MEMBERS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "wharf_pool_hung_members_total",
        "Total number of members that did not stop within the shutdown timeout"
    )
    .unwrap()
});
