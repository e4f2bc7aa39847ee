use base64::{engine::general_purpose, Engine as _};

pub const MIME_PNG: &str = "image/png";
pub const MIME_JPEG: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ImageInputError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("image data URI is malformed")]
    MalformedDataUri,
}

/// A caller photo ready to be sent inline: base64 payload plus the MIME
/// type the model is told.
#[derive(Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
    pub byte_len: usize,
}

// Never print the payload itself.
impl std::fmt::Debug for InlineImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineImage")
            .field("mime_type", &self.mime_type)
            .field("byte_len", &self.byte_len)
            .finish()
    }
}

pub fn detect_mime_type(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| kind.mime_type().to_string())
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" | "image/heif" => "heic",
        _ => "jpg",
    }
}

impl InlineImage {
    /// Accepts `data:<mime>;base64,<payload>` or a bare base64 payload.
    /// A declared PNG stays PNG and everything else is sent as JPEG; bare
    /// payloads are sniffed the same way.
    pub fn from_data_uri(input: &str) -> Result<Self, ImageInputError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ImageInputError::Empty);
        }

        let (declared, payload) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest
                    .split_once(',')
                    .ok_or(ImageInputError::MalformedDataUri)?;
                (Some(header.to_ascii_lowercase()), payload.trim())
            }
            None => (None, input),
        };
        if payload.is_empty() {
            return Err(ImageInputError::Empty);
        }

        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|err| ImageInputError::InvalidBase64(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageInputError::Empty);
        }

        let is_png = match declared {
            Some(header) => header.contains(MIME_PNG),
            None => detect_mime_type(&bytes).as_deref() == Some(MIME_PNG),
        };

        Ok(Self {
            mime_type: if is_png { MIME_PNG } else { MIME_JPEG }.to_string(),
            data: payload.to_string(),
            byte_len: bytes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn encode(bytes: &[u8]) -> String {
        general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn declared_png_is_sent_as_png() {
        let uri = format!("data:image/png;base64,{}", encode(b"not really a png"));
        let image = InlineImage::from_data_uri(&uri).expect("valid");
        assert_eq!(image.mime_type, MIME_PNG);
        assert_eq!(image.data, encode(b"not really a png"));
    }

    #[test]
    fn other_declared_types_default_to_jpeg() {
        for header in ["image/jpeg", "image/webp", "application/octet-stream"] {
            let uri = format!("data:{header};base64,{}", encode(PNG_HEADER));
            let image = InlineImage::from_data_uri(&uri).expect("valid");
            assert_eq!(image.mime_type, MIME_JPEG, "{header}");
        }
    }

    #[test]
    fn bare_payloads_are_sniffed() {
        let png = InlineImage::from_data_uri(&encode(PNG_HEADER)).expect("valid");
        assert_eq!(png.mime_type, MIME_PNG);
        let other = InlineImage::from_data_uri(&encode(b"plain bytes")).expect("valid");
        assert_eq!(other.mime_type, MIME_JPEG);
    }

    #[test]
    fn bad_inputs_are_rejected() {
        assert_eq!(InlineImage::from_data_uri("  "), Err(ImageInputError::Empty));
        assert_eq!(
            InlineImage::from_data_uri("data:image/png;base64"),
            Err(ImageInputError::MalformedDataUri)
        );
        assert!(matches!(
            InlineImage::from_data_uri("data:image/png;base64,@@@"),
            Err(ImageInputError::InvalidBase64(_))
        ));
    }

    #[test]
    fn debug_output_omits_payload() {
        let image = InlineImage::from_data_uri(&encode(b"secret face")).expect("valid");
        let printed = format!("{image:?}");
        assert!(!printed.contains(&image.data));
    }
}
