pub mod openai;
pub mod zai;
