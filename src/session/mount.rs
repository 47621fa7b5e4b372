//! Pairs mount points with widget handles, in whichever order the two sides
//! show up. The UI asks for a mount id before the kernel has produced the
//! widget just as often as the other way around, so whichever call arrives
//! first creates the slot and the other one completes it. A key resolves at
//! most once; the broker lives as long as the session, not the process.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::oneshot;

/// An immutable, renderable reference to a widget. The UI layer decides what
/// to do with it; this crate only brokers the pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetHandle {
    pub widget_id: String,
}

impl WidgetHandle {
    pub fn new(widget_id: impl Into<String>) -> Self {
        Self {
            widget_id: widget_id.into(),
        }
    }
}

enum MountSlot {
    Waiting(Vec<oneshot::Sender<WidgetHandle>>),
    Ready(WidgetHandle),
}

#[derive(Default)]
pub struct MountBroker {
    slots: Mutex<HashMap<String, MountSlot>>,
}

impl MountBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handle to a mount key, waking every pending requester. A key
    /// already bound stays bound; the duplicate is dropped.
    pub fn provide(&self, mount_key: &str, handle: WidgetHandle) {
        let mut slots = self.slots.lock();
        match slots.entry(mount_key.to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                MountSlot::Ready(existing) => {
                    tracing::warn!(
                        target: "mooring::mount",
                        mount_key,
                        bound = %existing.widget_id,
                        ignored = %handle.widget_id,
                        "mount key already resolved, ignoring duplicate provide"
                    );
                }
                slot @ MountSlot::Waiting(_) => {
                    let waiters =
                        match std::mem::replace(slot, MountSlot::Ready(handle.clone())) {
                            MountSlot::Waiting(waiters) => waiters,
                            MountSlot::Ready(_) => Vec::new(),
                        };
                    for waiter in waiters {
                        let _ = waiter.send(handle.clone());
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(MountSlot::Ready(handle));
            }
        }
    }

    /// Wait for the handle bound to a mount key. Resolved keys answer
    /// immediately; unbound keys suspend until `provide` arrives. No timeout
    /// here; bounding the wait is the caller's responsibility.
    pub async fn request(&self, mount_key: &str) -> WidgetHandle {
        let waiter = {
            let mut slots = self.slots.lock();
            match slots.entry(mount_key.to_string()) {
                Entry::Occupied(mut occupied) => match occupied.get_mut() {
                    MountSlot::Ready(handle) => return handle.clone(),
                    MountSlot::Waiting(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        rx
                    }
                },
                Entry::Vacant(vacant) => {
                    let (tx, rx) = oneshot::channel();
                    vacant.insert(MountSlot::Waiting(vec![tx]));
                    rx
                }
            }
        };
        // The sender lives in the slot map, which outlives this borrow.
        waiter.await.expect("mount slot dropped while pending")
    }
}
