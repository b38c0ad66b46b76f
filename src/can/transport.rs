use anyhow::Result;

use super::protocol::Payload;

/// Frame-level access to a CAN bus
///
/// One send is expected to be followed by one bounded receive. Retry policy
/// for send failures lives in the implementation, never in the codec.
#[allow(async_fn_in_trait)]
pub trait FrameTransport {
    /// Send a frame carrying the first `dlc` bytes of `data`
    async fn send(&mut self, frame_id: u32, dlc: u8, data: &Payload) -> Result<()>;

    /// Wait up to `timeout_ms` for the next frame
    ///
    /// # Returns
    /// * `Ok(Some((frame_id, data)))` if a frame arrived
    /// * `Ok(None)` on timeout
    async fn receive(&mut self, timeout_ms: u32) -> Result<Option<(u32, Vec<u8>)>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::*;

    /// In-memory transport: records sent frames and plays back queued replies
    #[derive(Debug, Default)]
    pub struct MockTransport {
        pub sent: Vec<(u32, Vec<u8>)>,
        pub replies: VecDeque<(u32, Vec<u8>)>,
        pub fail_sends: bool,
    }

    impl MockTransport {
        pub fn with_replies(replies: impl IntoIterator<Item = (u32, Vec<u8>)>) -> Self {
            Self {
                replies: replies.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl FrameTransport for MockTransport {
        async fn send(&mut self, frame_id: u32, dlc: u8, data: &Payload) -> Result<()> {
            if self.fail_sends {
                anyhow::bail!("mock send failure");
            }
            self.sent.push((frame_id, data[..dlc as usize].to_vec()));
            Ok(())
        }

        async fn receive(&mut self, _timeout_ms: u32) -> Result<Option<(u32, Vec<u8>)>> {
            Ok(self.replies.pop_front())
        }
    }
}
