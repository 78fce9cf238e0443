use std::collections::HashMap;

use super::protocol::MessageTag;

pub type ReliableHandler = Box<dyn FnMut(&[u8])>;

/// Registry of reliable-command handlers, keyed by message tag. A tag may
/// carry several handlers; all of them see the same payload, in registration
/// order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageTag, Vec<ReliableHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: &str, handler: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.register_tag(MessageTag::from_name(type_name), handler);
    }

    pub fn register_tag<F>(&mut self, tag: MessageTag, handler: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.handlers.entry(tag).or_default().push(Box::new(handler));
    }

    /// Invokes every handler registered for the tag; returns how many ran.
    pub fn dispatch(&mut self, tag: MessageTag, payload: &[u8]) -> usize {
        let Some(handlers) = self.handlers.get_mut(&tag) else {
            log::debug!("no handler for reliable command {:08X}", tag.raw());
            return 0;
        };

        for handler in handlers.iter_mut() {
            handler(payload);
        }

        handlers.len()
    }
}
