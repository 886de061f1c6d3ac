//! `reactloop ask` — Run a single query through the agent loop.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reactloop_config::AppConfig;
use reactloop_core::run::{Attachment, RunRequest, UserContext};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    query: String,
    images: Vec<String>,
    profile: Vec<(String, String)>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set REACTLOOP_API_KEY (or AZURE_OPENAI_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add provider.api_key to {}", AppConfig::config_path().display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let attachments = images
        .iter()
        .map(|image| image_attachment(image))
        .collect::<Result<Vec<_>, _>>()?;
    let user_context = profile
        .into_iter()
        .fold(UserContext::new(), |ctx, (key, value)| ctx.with(key, value));

    let mut request = RunRequest::new(query).with_attachments(attachments);
    if !user_context.is_empty() {
        request = request.with_user_context(user_context);
    }

    let runtime = reactloop_gateway::bootstrap(&config).await?;

    eprint!("  Thinking...");
    let outcome = runtime.agent.run(request).await?;
    eprint!("\r              \r");

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.answer);
        eprintln!("  ({} iteration(s), {} step(s))", outcome.iterations, outcome.steps.len());
    }

    Ok(())
}

/// `key=value` for `--profile`.
pub fn parse_profile_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// URLs pass through; local files are inlined as base64 `data:` URLs.
fn image_attachment(image: &str) -> Result<Attachment, Box<dyn std::error::Error>> {
    if ["http://", "https://", "data:"].iter().any(|p| image.starts_with(p)) {
        return Ok(Attachment::new(image));
    }

    let path = Path::new(image);
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read image {image}: {e}"))?;
    Ok(Attachment::new(format!(
        "data:{};base64,{}",
        mime_for(path),
        STANDARD.encode(bytes)
    )))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_fields_split_on_first_equals() {
        assert_eq!(
            parse_profile_field("city=New York"),
            Ok(("city".into(), "New York".into()))
        );
        assert_eq!(parse_profile_field("note=a=b"), Ok(("note".into(), "a=b".into())));
        assert!(parse_profile_field("city").is_err());
        assert!(parse_profile_field("=x").is_err());
    }

    #[test]
    fn urls_are_passed_through() {
        let a = image_attachment("https://example.com/cat.png").unwrap();
        assert_eq!(a, Attachment::new("https://example.com/cat.png"));
    }

    #[test]
    fn local_images_become_data_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.PNG");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let a = image_attachment(path.to_str().unwrap()).unwrap();
        assert_eq!(a, Attachment::new("data:image/png;base64,AQID"));
    }

    #[test]
    fn missing_image_is_an_error() {
        assert!(image_attachment("/definitely/not/here.jpg").is_err());
    }
}
