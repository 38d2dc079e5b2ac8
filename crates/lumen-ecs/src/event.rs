//! Named event channels with failure-isolated dispatch.
//!
//! An [`EventBus<C>`] holds independently registered channels, each with a
//! set of [`Handler<C>`]s. Invoking a channel calls every subscriber with a
//! mutable context `C` (the [`Scene`](crate::scene::Scene) in practice) and
//! the event's [`EventArgs`].
//!
//! A subscriber that returns an error or panics is logged and counted in the
//! [`DispatchReport`]; the remaining subscribers still run and the caller of
//! `invoke` never sees the failure.
//!
//! Because the bus usually lives inside the context it dispatches to,
//! dispatch is split in two steps: [`EventBus::prepare`] snapshots a
//! channel's subscribers into a [`Dispatch`], which is then
//! [`run`](Dispatch::run) against the context. Handlers may therefore
//! subscribe, unsubscribe or invoke other events while being dispatched;
//! changes take effect from the next invocation.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, info, trace, warn};

// ---------------------------------------------------------------------------
// Core event names
// ---------------------------------------------------------------------------

/// Channels every scene registers at construction.
///
/// Argument shapes:
///
/// | event | args |
/// |---|---|
/// | `entity.*` | `[EntityId]` |
/// | `component.*`, `global.*`, `system.*` | `[TypeKey]` |
/// | `update`, `post_update` | `[f64]` (delta seconds) |
pub mod names {
    pub const ENTITY_BEFORE_CREATE: &str = "entity.before_create";
    pub const ENTITY_AFTER_CREATE: &str = "entity.after_create";
    pub const ENTITY_BEFORE_DESTROY: &str = "entity.before_destroy";
    pub const ENTITY_AFTER_DESTROY: &str = "entity.after_destroy";
    pub const COMPONENT_ADDED: &str = "component.added";
    pub const COMPONENT_REMOVED: &str = "component.removed";
    pub const GLOBAL_ADDED: &str = "global.added";
    pub const GLOBAL_REMOVED: &str = "global.removed";
    pub const SYSTEM_ADDED: &str = "system.added";
    pub const SYSTEM_REMOVED: &str = "system.removed";
    pub const UPDATE: &str = "update";
    pub const POST_UPDATE: &str = "post_update";

    /// Entity and registry lifecycle channels.
    pub const LIFECYCLE: &[&str] = &[
        ENTITY_BEFORE_CREATE,
        ENTITY_AFTER_CREATE,
        ENTITY_BEFORE_DESTROY,
        ENTITY_AFTER_DESTROY,
        COMPONENT_ADDED,
        COMPONENT_REMOVED,
        GLOBAL_ADDED,
        GLOBAL_REMOVED,
        SYSTEM_ADDED,
        SYSTEM_REMOVED,
    ];

    /// Per-frame channels.
    pub const FRAME: &[&str] = &[UPDATE, POST_UPDATE];
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Misuse of the bus itself. These are programmer errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("unknown event '{name}'. Registered events: [{registered}]")]
    UnknownEvent { name: String, registered: String },

    #[error("event '{name}' is already registered")]
    AlreadyRegistered { name: String },
}

/// Failure of a single subscriber. Logged by the dispatcher, never propagated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    #[error("argument {index} missing: event carried {len} argument(s)")]
    MissingArgument { index: usize, len: usize },

    #[error("argument {index} is not a {expected}")]
    ArgumentType {
        index: usize,
        expected: &'static str,
    },

    #[error("system '{system}' was dropped while still subscribed")]
    SystemDropped { system: &'static str },

    #[error("system '{system}' is already borrowed by an outer dispatch")]
    SystemBusy { system: &'static str },

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// A handler-specific failure with a free-form message.
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// EventArgs
// ---------------------------------------------------------------------------

/// Positional, type-erased event arguments.
///
/// Handlers read arguments with [`get`](Self::get); asking for the wrong
/// index or type yields a [`HandlerError`] rather than a panic, which the
/// dispatcher logs as a per-subscriber failure.
#[derive(Default)]
pub struct EventArgs {
    values: Vec<Box<dyn Any>>,
}

impl EventArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// A single argument.
    pub fn one<T: Any>(value: T) -> Self {
        Self::new().with(value)
    }

    /// Append an argument (builder style).
    pub fn with<T: Any>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Any>(&mut self, value: T) {
        self.values.push(Box::new(value));
    }

    /// The argument at `index`, downcast to `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&T, HandlerError> {
        let value = self.values.get(index).ok_or(HandlerError::MissingArgument {
            index,
            len: self.values.len(),
        })?;
        value
            .downcast_ref::<T>()
            .ok_or(HandlerError::ArgumentType {
                index,
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for EventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventArgs")
            .field("len", &self.values.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

type HandlerFn<C> = dyn Fn(&mut C, &EventArgs) -> Result<(), HandlerError>;

/// A shared, callable subscriber handle.
///
/// Cloning a handler yields the same handle: two handlers are equal only if
/// one was cloned from the other. Unsubscribing therefore requires the handle
/// that was subscribed (or a clone of it), not an equivalent closure.
pub struct Handler<C> {
    label: Cow<'static, str>,
    func: Rc<HandlerFn<C>>,
}

impl<C> Handler<C> {
    /// Wrap a closure as an anonymous handler.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&mut C, &EventArgs) -> Result<(), HandlerError> + 'static,
    {
        Self::named("anonymous", func)
    }

    /// Wrap a closure with a label used in dispatch diagnostics.
    pub fn named<F>(label: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(&mut C, &EventArgs) -> Result<(), HandlerError> + 'static,
    {
        Self {
            label: label.into(),
            func: Rc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether `other` is the same handle (a clone of this one).
    pub fn same_as(&self, other: &Handler<C>) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.func).cast::<()>(),
            Rc::as_ptr(&other.func).cast::<()>(),
        )
    }

    fn call(&self, ctx: &mut C, args: &EventArgs) -> Result<(), HandlerError> {
        (self.func)(ctx, args)
    }
}

impl<C> Clone for Handler<C> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            func: Rc::clone(&self.func),
        }
    }
}

impl<C> PartialEq for Handler<C> {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl<C> fmt::Debug for Handler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("label", &self.label)
            .field("ptr", &Rc::as_ptr(&self.func).cast::<()>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DispatchReport
// ---------------------------------------------------------------------------

/// Outcome of one or more invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers called.
    pub invoked: usize,
    /// Subscribers that returned an error or panicked.
    pub failed: usize,
}

impl DispatchReport {
    /// Subscribers that completed without error.
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failed
    }

    /// Accumulate another report into this one.
    pub fn absorb(&mut self, other: DispatchReport) {
        self.invoked += other.invoked;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// A snapshot of one channel's subscribers, ready to run.
pub struct Dispatch<C> {
    event: String,
    logging: bool,
    subscribers: Vec<Handler<C>>,
}

impl<C> Dispatch<C> {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Call every subscriber once, isolating failures.
    pub fn run(self, ctx: &mut C, args: &EventArgs) -> DispatchReport {
        if self.logging {
            info!(
                event = %self.event,
                subscribers = self.subscribers.len(),
                args = args.len(),
                "event invoked"
            );
        }

        let mut report = DispatchReport::default();
        for handler in &self.subscribers {
            report.invoked += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.call(ctx, args)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        event = %self.event,
                        handler = handler.label(),
                        error = %err,
                        "event subscriber failed"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    error!(
                        event = %self.event,
                        handler = handler.label(),
                        panic = panic_message(payload.as_ref()),
                        "event subscriber panicked"
                    );
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

struct Channel<C> {
    logging: bool,
    subscribers: Vec<Handler<C>>,
}

/// A set of named channels dispatching to context `C`.
pub struct EventBus<C> {
    channels: HashMap<String, Channel<C>>,
}

impl<C> EventBus<C> {
    /// Create a bus with no channels.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Declare a new, empty channel.
    ///
    /// # Errors
    ///
    /// [`EventError::AlreadyRegistered`] if `name` exists. Silently replacing
    /// a channel would drop its subscribers.
    pub fn register_event(
        &mut self,
        name: impl Into<String>,
        enable_logging: bool,
    ) -> Result<(), EventError> {
        let name = name.into();
        if self.channels.contains_key(&name) {
            return Err(EventError::AlreadyRegistered { name });
        }
        self.channels.insert(
            name,
            Channel {
                logging: enable_logging,
                subscribers: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Toggle per-invocation logging on an existing channel.
    pub fn set_logging(&mut self, name: &str, enabled: bool) -> Result<(), EventError> {
        self.channel_mut(name)?.logging = enabled;
        Ok(())
    }

    /// Add `handler` to `name`'s subscribers.
    ///
    /// Returns `false` if that exact handle was already subscribed.
    pub fn subscribe(&mut self, name: &str, handler: Handler<C>) -> Result<bool, EventError> {
        let channel = self.channel_mut(name)?;
        if channel.subscribers.iter().any(|h| h.same_as(&handler)) {
            return Ok(false);
        }
        trace!(event = name, handler = handler.label(), "subscribe");
        channel.subscribers.push(handler);
        Ok(true)
    }

    /// Remove `handler` from `name`'s subscribers.
    ///
    /// Returns `false` if the handle was not subscribed.
    pub fn unsubscribe(&mut self, name: &str, handler: &Handler<C>) -> Result<bool, EventError> {
        let channel = self.channel_mut(name)?;
        let Some(pos) = channel.subscribers.iter().position(|h| h.same_as(handler)) else {
            return Ok(false);
        };
        trace!(event = name, handler = handler.label(), "unsubscribe");
        channel.subscribers.remove(pos);
        Ok(true)
    }

    /// Number of subscribers on `name`, or `None` if it is not registered.
    pub fn subscriber_count(&self, name: &str) -> Option<usize> {
        self.channels.get(name).map(|c| c.subscribers.len())
    }

    /// Whether `handler` is currently subscribed to `name`.
    pub fn is_subscribed(&self, name: &str, handler: &Handler<C>) -> bool {
        self.channels
            .get(name)
            .is_some_and(|c| c.subscribers.iter().any(|h| h.same_as(handler)))
    }

    /// Registered channel names, sorted.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Snapshot `name`'s subscribers for dispatch.
    pub fn prepare(&self, name: &str) -> Result<Dispatch<C>, EventError> {
        let channel = self.channel(name)?;
        Ok(Dispatch {
            event: name.to_owned(),
            logging: channel.logging,
            subscribers: channel.subscribers.clone(),
        })
    }

    /// Invoke `name` against a context that does not own this bus.
    pub fn invoke(
        &self,
        ctx: &mut C,
        name: &str,
        args: &EventArgs,
    ) -> Result<DispatchReport, EventError> {
        Ok(self.prepare(name)?.run(ctx, args))
    }

    fn channel(&self, name: &str) -> Result<&Channel<C>, EventError> {
        match self.channels.get(name) {
            Some(channel) => Ok(channel),
            None => Err(self.unknown(name)),
        }
    }

    fn channel_mut(&mut self, name: &str) -> Result<&mut Channel<C>, EventError> {
        if !self.channels.contains_key(name) {
            return Err(self.unknown(name));
        }
        match self.channels.get_mut(name) {
            Some(channel) => Ok(channel),
            None => unreachable!("channel '{name}' checked above"),
        }
    }

    fn unknown(&self, name: &str) -> EventError {
        EventError::UnknownEvent {
            name: name.to_owned(),
            registered: self.event_names().join(", "),
        }
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
