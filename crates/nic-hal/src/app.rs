/// The framework's app contract: a processing stage driven by the
/// scheduler's cooperative tick. Implementations must never block in
/// `push`/`pull` — they do a bounded amount of work and return.
pub trait NetworkApp {
    type Config;
    type Error: std::error::Error + 'static;

    fn new(config: Self::Config) -> Result<Self, Self::Error>
    where
        Self: Sized;

    /// Drains readable input links, doing whatever work corresponds to the
    /// data arriving on them.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Fills output links with whatever data is ready to be produced.
    fn pull(&mut self) -> Result<(), Self::Error>;

    /// Optional graceful shutdown. Default is a no-op for apps with no
    /// external resources to release.
    fn stop(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
