pub mod audio_engine;
