pub mod ai;
pub mod catalog;
pub mod conversation;

pub use ai::AiService;
pub use catalog::CatalogService;
pub use conversation::ConversationService;
