// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel synchronisation primitives
//! OWNERS: @kernel-sync-team
//! PUBLIC API: cpu_lock (big lock guard), switch_lock (helping lock), rcu (grace periods)
//! DEPENDS_ON: spin, core::sync::atomic
//! INVARIANTS: Mapping calls run with the big lock released; switch locks never block on try_lock
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod cpu_lock;
pub mod rcu;
pub mod switch_lock;
