pub mod codec_tests;
pub mod retention_tests;
