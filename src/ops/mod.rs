//! Built-in flow-control node types: `split`, `join`,
//! `switch`, `trigger`, `schedule`. Each submodule exposes a `node_info()`
//! builder and a `*Factory` that [`register_all`] wires into the process
//! registry ("called from module init").

pub mod join;
pub mod schedule;
pub mod split;
pub mod switch;
pub mod trigger;

use std::sync::Arc;

use crate::error::Result;
use crate::node::REGISTRY;

/// Registers every built-in node type. Safe to call more than once from
/// independent crates sharing the same process; a second call observes
/// `duplicate-type` for each entry and that's treated as already-done,
/// not a hard failure, so composing binaries don't have to coordinate who
/// calls it first.
pub fn register_all() -> Result<()> {
    let registrations: Vec<_> = vec![
        (split::node_info(), Arc::new(split::SplitFactory) as Arc<dyn crate::node::ExecutorFactory>),
        (join::node_info(), Arc::new(join::JoinFactory)),
        (switch::node_info(2), Arc::new(switch::SwitchFactory)),
        (trigger::node_info(), Arc::new(trigger::TriggerFactory)),
        (schedule::node_info(), Arc::new(schedule::ScheduleFactory)),
    ];
    for (info, factory) in registrations {
        match REGISTRY.register(info, factory) {
            Ok(()) => {}
            Err(e) if e.kind() == crate::error::ErrorKind::DuplicateType => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
