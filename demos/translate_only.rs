//! Demonstrate using the conversion core without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use futures::StreamExt;
use llm_bridge::{ProviderKind, ProviderRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = ProviderRegistry::global();

    println!("=== Registered conversions ===");
    for (source, target) in registry.all_conversion_pairs() {
        println!("  {source} -> {target}");
    }

    // An OpenAI-style request, as a chat client would send it
    let openai_request = serde_json::json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "You are a geography expert. Be concise."},
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": "Paris."},
            {"role": "user", "content": "And Germany?"}
        ],
        "temperature": 0.7,
        "stream": true
    });

    let to_anthropic = registry.pipeline(ProviderKind::OpenAi, ProviderKind::Anthropic)?;
    let anthropic_request = to_anthropic.convert_request(openai_request.to_string().as_bytes())?;

    println!();
    println!("=== Request (Anthropic format) ===");
    println!("{}", serde_json::to_string_pretty(&anthropic_request)?);

    // What an Anthropic upstream would answer, converted back
    let anthropic_response = serde_json::json!({
        "id": "msg_demo",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": "Berlin."}],
        "model": "claude-sonnet-4-5",
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 42, "output_tokens": 3}
    });

    let to_openai = registry.pipeline(ProviderKind::Anthropic, ProviderKind::OpenAi)?;
    let openai_response = to_openai.convert_response(anthropic_response.to_string().as_bytes())?;

    println!();
    println!("=== Response (OpenAI format) ===");
    println!("{}", serde_json::to_string_pretty(&openai_response)?);

    // A streamed answer arriving in awkward transport pieces
    println!();
    println!("=== Stream (Anthropic -> OpenAI) ===");

    let transport = concat!(
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_demo\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude-sonnet-4-5\",\"usage\":{\"input_tokens\":42,\"output_tokens\":1}}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Ber\"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lin.\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    );
    let pieces = transport
        .as_bytes()
        .chunks(37)
        .map(Ok::<_, llm_bridge::BridgeError>);

    let mut frames = Box::pin(to_openai.convert_stream(tokio_stream::iter(pieces)));
    while let Some(frame) = frames.next().await {
        print!("  {}", frame?);
    }

    println!();
    println!("Done! The conversion core works without any network calls.");
    Ok(())
}
