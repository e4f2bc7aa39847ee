pub mod assemble;
pub mod settings;
pub mod templates;

pub use assemble::assemble_prompt;
pub use settings::{AdvancedSetting, HeadshotGenerationSettings, Lighting};
pub use templates::PromptTemplates;
