pub mod replies;

use std::collections::HashMap;
use anyhow::anyhow;
use fluent::{FluentArgs, FluentResource};
use include_dir::{Dir, File};

type Error = anyhow::Error;
type FluentBundle = fluent::bundle::FluentBundle<FluentResource, intl_memoizer::concurrent::IntlLangMemoizer>;

/// Fluent bundles keyed by locale name. Every lookup ends at `fallback`.
pub struct Locales {
    fallback: String,
    bundles: HashMap<String, FluentBundle>,
}

impl Locales {
    /// One bundle per `<locale>.ftl` file at the top of `dir`.
    pub fn from_dir(dir: &Dir<'_>, fallback: &str) -> Result<Self, Error> {
        let bundles = dir.files()
            .map(bundle_from_file)
            .collect::<Result<HashMap<_, _>, Error>>()?;

        Self::new_with_bundles(fallback.to_owned(), bundles)
    }

    pub fn new_with_bundles(fallback: String, bundles: HashMap<String, FluentBundle>) -> Result<Self, Error> {
        if !bundles.contains_key(&fallback) {
            return Err(anyhow!("fallback locale {} not found", fallback));
        }

        Ok(Self { fallback, bundles })
    }

    /// `de-AT` with fallback `en` searches `de-AT`, `de`, `en`.
    fn chain<'a>(&'a self, locale: &'a str) -> Vec<&'a str> {
        let mut chain = vec![locale];
        if let Some((language, _)) = locale.split_once('-') {
            chain.push(language);
        }
        if !chain.contains(&self.fallback.as_str()) {
            chain.push(&self.fallback);
        }
        chain
    }

    pub fn resolve(&self, locale: &str, id: &str, args: Option<&FluentArgs>) -> Result<String, Error> {
        let found = self.chain(locale).into_iter()
            .filter_map(|candidate| self.bundles.get(candidate).map(|bundle| (candidate, bundle)))
            .find_map(|(candidate, bundle)| bundle.get_message(id).map(|message| (candidate, bundle, message)));

        let Some((candidate, bundle, message)) = found else {
            return Err(anyhow!("message '{}' not found for {}", id, locale));
        };

        let pattern = message.value()
            .ok_or_else(|| anyhow!("message '{}' in {} has no value", id, candidate))?;

        let mut errors = vec![];
        let text = bundle.format_pattern(pattern, args, &mut errors);
        if !errors.is_empty() {
            tracing::warn!("Formatting '{}' in {}: {:?}", id, candidate, errors);
        }

        Ok(text.into_owned())
    }
}

fn bundle_from_file(file: &File<'_>) -> Result<(String, FluentBundle), Error> {
    let path = file.path();
    let locale = path.file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("invalid locale file name: {}", path.display()))?;

    let source = file.contents_utf8()
        .ok_or_else(|| anyhow!("{} is not UTF-8", path.display()))?;
    let resource = FluentResource::try_new(source.to_owned())
        .map_err(|(_, errors)| anyhow!("failed to parse {}: {:?}", path.display(), errors))?;

    let mut bundle = FluentBundle::new_concurrent(vec![locale
        .parse()
        .map_err(|e| anyhow!("invalid locale `{}`: {}", locale, e))?]);
    // chat clients render the bidi isolation marks literally
    bundle.set_use_isolating(false);
    bundle.add_resource(resource)
        .map_err(|errors| anyhow!("conflicting messages in {}: {:?}", path.display(), errors))?;

    Ok((locale.to_owned(), bundle))
}
