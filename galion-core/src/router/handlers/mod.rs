pub mod archive;
pub mod civitai;
pub mod generic;
pub mod generic_stream;
pub mod github;
pub mod huggingface;
pub mod news;
pub mod youtube;
