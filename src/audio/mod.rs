mod cpal_backend;
pub use self::cpal_backend::CpalBackend;

pub trait AudioBackend {
    fn start(&mut self) -> Result<(), Box<dyn std::error::Error>>;
    fn stop(&mut self) -> Result<(), Box<dyn std::error::Error>>;
}
