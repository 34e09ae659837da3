//! Asynchronous planar readback
//!
//! GPU readback of the three I420 planes completes out of order. A
//! [`PlaneReadback`] resolves once all three planes have arrived and can be
//! cancelled when the session tears down.

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::capture::CaptureSource;
use super::format::Resolution;
use crate::error::{AppError, Result};

/// Completed set of planes
#[derive(Debug)]
pub struct PlaneSet {
    pub resolution: Resolution,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

/// Producer half handed to the readback requester
#[derive(Debug)]
pub struct PlaneSenders {
    pub y: oneshot::Sender<Vec<u8>>,
    pub u: oneshot::Sender<Vec<u8>>,
    pub v: oneshot::Sender<Vec<u8>>,
}

/// Pending readback of one frame
#[derive(Debug)]
pub struct PlaneReadback {
    resolution: Resolution,
    y: oneshot::Receiver<Vec<u8>>,
    u: oneshot::Receiver<Vec<u8>>,
    v: oneshot::Receiver<Vec<u8>>,
}

impl PlaneReadback {
    pub fn new(resolution: Resolution) -> (Self, PlaneSenders) {
        let (y_tx, y_rx) = oneshot::channel();
        let (u_tx, u_rx) = oneshot::channel();
        let (v_tx, v_rx) = oneshot::channel();
        (
            Self {
                resolution,
                y: y_rx,
                u: u_rx,
                v: v_rx,
            },
            PlaneSenders {
                y: y_tx,
                u: u_tx,
                v: v_tx,
            },
        )
    }

    /// Wait for all planes. Returns `Ok(None)` if cancelled first.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<Option<PlaneSet>> {
        let resolution = self.resolution;
        let all = async move {
            let (y, u, v) = tokio::try_join!(self.y, self.u, self.v)
                .map_err(|_| AppError::VideoError("Plane readback abandoned".to_string()))?;
            Ok::<_, AppError>(PlaneSet { resolution, y, u, v })
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Plane readback cancelled");
                Ok(None)
            }
            planes = all => planes.map(Some),
        }
    }

    /// Wait for all planes and push them into `capture`.
    ///
    /// Returns whether the frame was accepted by the capture throttle.
    pub async fn deliver(self, capture: &CaptureSource, cancel: &CancellationToken) -> Result<bool> {
        match self.wait(cancel).await? {
            Some(planes) => capture.push_yuv(
                &planes.y,
                &planes.u,
                &planes.v,
                planes.resolution.width,
                planes.resolution.height,
            ),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::capture::CollectingSink;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_completes_when_all_planes_arrive() {
        let (readback, senders) = PlaneReadback::new(Resolution::new(2, 2));
        senders.v.send(vec![3]).unwrap();
        senders.y.send(vec![1; 4]).unwrap();
        senders.u.send(vec![2]).unwrap();

        let planes = readback
            .wait(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(planes.y, vec![1; 4]);
        assert_eq!(planes.u, vec![2]);
        assert_eq!(planes.v, vec![3]);
    }

    #[tokio::test]
    async fn test_cancel_before_completion() {
        let (readback, senders) = PlaneReadback::new(Resolution::new(2, 2));
        senders.y.send(vec![1; 4]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(readback.wait(&cancel).await.unwrap().is_none());
        drop(senders.u);
    }

    #[test]
    fn test_dropped_sender_is_error() {
        let (readback, senders) = PlaneReadback::new(Resolution::new(2, 2));
        drop(senders);
        let err = tokio_test::block_on(readback.wait(&CancellationToken::new())).unwrap_err();
        assert!(matches!(err, AppError::VideoError(_)));
    }

    #[tokio::test]
    async fn test_deliver_pushes_into_capture() {
        let sink = Arc::new(CollectingSink::new());
        let capture = CaptureSource::new(sink.clone());
        capture.start(2, 2, 30).unwrap();

        let (readback, senders) = PlaneReadback::new(Resolution::new(2, 2));
        senders.y.send(vec![9; 4]).unwrap();
        senders.u.send(vec![8]).unwrap();
        senders.v.send(vec![7]).unwrap();

        assert!(readback.deliver(&capture, &CancellationToken::new()).await.unwrap());
        assert_eq!(sink.frames()[0].buffer().v_plane(), &[7]);
    }
}
