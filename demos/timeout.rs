use std::time::Duration;
use iothub_probe::prelude::*;

#[tokio::main]
async fn main() -> ProbeResult<()> {
    let hub = MemoryHub::new("my-hub.example.net");
    hub.register_device("my-device", "c2VjcmV0");

    // The hub takes longer to acknowledge than the probe is prepared to wait
    hub.set_ack_delay(Duration::from_secs(5));

    let (reporter, mut reports) = ChannelReporter::new();
    let probe = Probe::new(hub, reporter).with_timeout(Duration::from_secs(1));

    let params = ConnectionParameters::new("my-hub.example.net", "my-device", "c2VjcmV0", Protocol::Https);
    let task = probe.send(params, "Are you there?");

    // The guard closes the client after one second, cancelling the pending message
    task.join().await?;

    let report = reports.recv().await.ok_or(ProbeError::ChannelClosed)?;
    assert_eq!(report.text, "IoT Hub responded to message 'Are you there?' with status MESSAGE_CANCELLED_ONCLOSE");
    println!("{}", report.text);

    Ok(())
}
