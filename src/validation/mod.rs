mod gate;

pub use gate::{Gate, INDOOR_SCENE_QUESTION, ValidationVerdict, evaluate, prompt_relevance_question};
