pub mod translation_memory;
