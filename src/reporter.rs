use std::fmt;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Which of the two result outputs a report belongs on.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Channel {
    Send,
    Receive,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::Send => write!(f, "SEND"),
            Channel::Receive => write!(f, "RECEIVE"),
        }
    }
}

/// One human readable outcome.
#[derive(Clone, PartialEq, Debug)]
pub struct Report {
    pub channel: Channel,
    pub text: String,
}

/// Where operations publish their outcomes. Called from whatever task or thread produced the
/// outcome, so implementations do their own marshaling to the presentation layer.
pub trait ResultReporter: 'static + Send + Sync {
    fn report(&self, channel: Channel, text: &str);
}

/// Forwards reports into a channel for the presentation layer to drain.
#[derive(Clone)]
pub struct ChannelReporter {
    sender: UnboundedSender<Report>,
}

impl ChannelReporter {
    pub fn new() -> (Self, UnboundedReceiver<Report>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResultReporter for ChannelReporter {
    fn report(&self, channel: Channel, text: &str) {
        info!("[{}] {}", channel, text);
        let report = Report { channel, text: text.to_string() };
        if self.sender.send(report).is_err() {
            debug!("Report dropped, presentation layer has gone away");
        }
    }
}

/// Writes every report to the log.
#[derive(Clone, Copy, Default)]
pub struct LogReporter;

impl ResultReporter for LogReporter {
    fn report(&self, channel: Channel, text: &str) {
        info!("[{}] {}", channel, text);
    }
}

#[tokio::test]
async fn test_channel_reporter_forwards_in_order() {
    let (reporter, mut receiver) = ChannelReporter::new();
    reporter.report(Channel::Send, "a");
    reporter.report(Channel::Receive, "b");

    assert_eq!(Report { channel: Channel::Send, text: "a".into() }, receiver.recv().await.unwrap());
    assert_eq!(Report { channel: Channel::Receive, text: "b".into() }, receiver.recv().await.unwrap());
}

#[test]
fn test_channel_reporter_survives_dropped_receiver() {
    let (reporter, receiver) = ChannelReporter::new();
    drop(receiver);
    reporter.report(Channel::Send, "nobody is listening");
}

#[test]
fn test_log_reporter_needs_no_logger() {
    LogReporter.report(Channel::Receive, "logged only");
}
