//! Stream items
//!
//! Every stage queue carries `StreamItem<T>` rather than a bare `T` so the
//! end-of-stream marker is a first-class variant and every consumer has to
//! handle it exhaustively.

/// One element on a stage queue: either a data record or the end-of-stream
/// marker that drives the shutdown protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<T> {
    /// A data record flowing through the pipeline.
    Record(T),
    /// End of stream. Emitted exactly once by the flow source and forwarded
    /// exactly once by each stage to each of its output queues.
    EndOfStream,
}

impl<T> StreamItem<T> {
    /// True if this is the end-of-stream marker.
    pub fn is_eos(&self) -> bool {
        matches!(self, StreamItem::EndOfStream)
    }

    /// Unwrap the record, if any.
    pub fn into_record(self) -> Option<T> {
        match self {
            StreamItem::Record(r) => Some(r),
            StreamItem::EndOfStream => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eos_detection() {
        let item: StreamItem<u32> = StreamItem::EndOfStream;
        assert!(item.is_eos());
        assert!(!StreamItem::Record(1u32).is_eos());
    }

    #[test]
    fn test_into_record() {
        assert_eq!(StreamItem::Record(7u32).into_record(), Some(7));
        assert_eq!(StreamItem::<u32>::EndOfStream.into_record(), None);
    }
}
