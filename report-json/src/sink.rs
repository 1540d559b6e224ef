use crate::JsonError;

/// A consumer of encoded byte chunks.
///
/// The encoder knows nothing about where its output goes, it only hands
/// every chunk it produces to its sink in order.
pub trait ReportSink {
    /// Accepts the next chunk of encoded output
    fn add_data(&mut self, data: &[u8]) -> Result<(), JsonError>;

    /// Makes previously added data durable, if the sink buffers
    #[inline]
    fn flush(&mut self) -> Result<(), JsonError> {
        Ok(())
    }
}

impl ReportSink for Vec<u8> {
    #[inline]
    fn add_data(&mut self, data: &[u8]) -> Result<(), JsonError> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    #[inline]
    fn add_data(&mut self, data: &[u8]) -> Result<(), JsonError> {
        (**self).add_data(data)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), JsonError> {
        (**self).flush()
    }
}
