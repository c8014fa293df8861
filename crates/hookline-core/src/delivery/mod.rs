//! Delivery - rendering, transport and the per-entry dispatcher

mod dispatcher;
mod template;
mod transport;

pub use dispatcher::{DeliveryOutcome, DispatchReport, Dispatcher};
pub use template::{
    MiniJinjaRenderer, RenderedMessage, TemplateContext, TemplateError, TemplateRenderer,
};
pub use transport::{LettreTransport, MailTransport, OutboundMessage, TransportError};
