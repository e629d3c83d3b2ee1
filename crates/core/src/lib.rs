// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stagekit-core: stage tree data model for the stagekit workflow engine

pub mod clock;
pub mod error;
pub mod func;
pub mod payload;
pub mod stage;
pub mod value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{reason, ErrorInfo};
pub use func::{ArgBag, BoxFuture, FuncRef, Handler, ParamRule, Rerun, StageFn, StageFnBuilder};
pub use payload::{ChunkIo, PayloadError, PayloadStore};
pub use stage::{stage_eq, StageFuncSlot, StageHandle, StageNode, StageRecord};
pub use value::{BlobValue, Value};
