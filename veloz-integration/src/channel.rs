use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::warn;

/// Transmitter abstraction over different channel kinds.
///
/// Lets engine components send items without caring whether the other end is a tokio mpsc
/// channel, a test collector, or a dropped receiver.
pub trait Tx
where
    Self: Clone + Send,
{
    type Item;
    type Error;
    fn send(&self, item: Self::Item) -> Result<(), Self::Error>;
}

/// [`Tx`] backed by a [`tokio::sync::mpsc::UnboundedSender`].
#[derive(Debug)]
pub struct UnboundedTx<T, Error> {
    pub tx: tokio::sync::mpsc::UnboundedSender<T>,
    phantom: PhantomData<Error>,
}

impl<T, Error> UnboundedTx<T, Error> {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self {
        Self {
            tx,
            phantom: PhantomData,
        }
    }
}

impl<T, Error> Clone for UnboundedTx<T, Error> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            phantom: PhantomData,
        }
    }
}

impl<T, Error> Tx for UnboundedTx<T, Error>
where
    T: Send,
    Error: From<tokio::sync::mpsc::error::SendError<T>> + Send,
{
    type Item = T;
    type Error = Error;

    fn send(&self, item: Self::Item) -> Result<(), Self::Error> {
        self.tx.send(item).map_err(Error::from)
    }
}

/// Receiver half associated with an [`UnboundedTx`].
#[derive(Debug, Constructor)]
pub struct UnboundedRx<T> {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<T>,
}

impl<T> UnboundedRx<T> {
    /// Drain the next item without awaiting, returning `None` if the channel is empty or all
    /// transmitters have dropped.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> tokio_stream::wrappers::UnboundedReceiverStream<T> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.rx)
    }
}

impl<T> Iterator for UnboundedRx<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.rx.try_recv() {
                Ok(item) => break Some(item),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => continue,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => break None,
            }
        }
    }
}

/// Construct an unbounded channel, returning the `(UnboundedTx, UnboundedRx)` halves.
pub fn mpsc_unbounded<T, Error>() -> (UnboundedTx<T, Error>, UnboundedRx<T>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (UnboundedTx::new(tx), UnboundedRx::new(rx))
}

/// [`Tx`] wrapper that disables itself after the receiver drops, rather than erroring on
/// every subsequent send.
///
/// Used for optional consumers such as the gateway event stream.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct ChannelTxDroppable<ChannelTx> {
    pub state: ChannelState<ChannelTx>,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub enum ChannelState<Tx> {
    Active(Tx),
    Disabled,
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx> {
    pub fn new(tx: ChannelTx) -> Self {
        Self {
            state: ChannelState::Active(tx),
        }
    }

    pub fn disabled() -> Self {
        Self {
            state: ChannelState::Disabled,
        }
    }
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx>
where
    ChannelTx: Tx,
{
    pub fn send(&mut self, item: ChannelTx::Item) {
        let ChannelState::Active(tx) = &self.state else {
            return;
        };

        if tx.send(item).is_err() {
            let name = std::any::type_name::<ChannelTx::Item>();
            warn!(
                name,
                "ChannelTxDroppable receiver dropped - items will no longer be sent"
            );
            self.state = ChannelState::Disabled
        }
    }
}
