pub mod elevenlabs;
pub mod gemini;
