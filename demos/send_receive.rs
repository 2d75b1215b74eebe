use iothub_probe::prelude::*;

#[tokio::main]
async fn main() -> ProbeResult<()> {
    // Start a simulated hub that knows one device
    let hub = MemoryHub::new("my-hub.example.net");
    hub.register_device("my-device", "c2VjcmV0");

    // Reports arrive on a channel, to be rendered wherever suits
    let (reporter, mut reports) = ChannelReporter::new();
    let probe = Probe::new(hub.clone(), reporter);

    let params = ConnectionParameters::new("my-hub.example.net", "my-device", "c2VjcmV0", Protocol::Amqps);

    // Send one message and wait for the hub's acknowledgement
    let sender = probe.send(params.clone(), "Hello hub");
    let report = reports.recv().await.ok_or(ProbeError::ChannelClosed)?;
    println!("{}: {}", report.channel, report.text);
    sender.stop().await?;

    // Listen, and have the hub push two messages to the device
    let receiver = probe.receive(params);
    hub.send_to_device("my-device", Message::new("Hello device"))?;
    hub.send_to_device("my-device", Message::new("Goodbye device"))?;
    for _ in 0..2 {
        let report = reports.recv().await.ok_or(ProbeError::ChannelClosed)?;
        println!("{}: {}", report.channel, report.text);
    }
    receiver.stop().await?;

    Ok(())
}
