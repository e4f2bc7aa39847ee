pub mod gemini;
pub mod headshot;
pub mod media;

pub use gemini::GeminiClient;
