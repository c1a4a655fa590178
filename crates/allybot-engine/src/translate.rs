use futures_util::future::BoxFuture;

use crate::platform::PlatformError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub detected_source_lang: String,
    pub translated_text: String,
}

/// Remote translation service used by the `translate` command.
pub trait Translator: Send + Sync {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        target_lang: &'a str,
    ) -> BoxFuture<'a, Result<Translation, PlatformError>>;
}
