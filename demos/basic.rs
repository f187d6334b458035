use finding_notifier::{Dispatcher, Event, NotifierConfig, VULNERABILITY};

#[tokio::main]
async fn main() {
    let config = NotifierConfig::default()
        .with_webhook("critical", "https://discord.com/api/webhooks/123/critical")
        .with_webhook("high", "https://discord.com/api/webhooks/123/high")
        .with_min_severity("HIGH")
        .with_embeds(true);

    let Some(dispatcher) = Dispatcher::setup(config) else {
        return;
    };

    let event = Event::new(VULNERABILITY, "Remote code execution in /upload")
        .with_severity("CRITICAL")
        .with_title("RCE in upload handler")
        .with_tag("web");

    let outcome = dispatcher.handle(&event).await;
    println!("{:?}", outcome);

    dispatcher.shutdown().await;
}
