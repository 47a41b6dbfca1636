#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider + ?Sized> NamedProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Adds a provider; a later registration replaces an earlier one with the
    /// same name in place, keeping registration order.
    pub fn register(&mut self, provider: T) {
        if let Some(slot) = self
            .providers
            .iter_mut()
            .find(|existing| existing.name() == provider.name())
        {
            *slot = provider;
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        let wanted = name.trim();
        self.providers
            .iter()
            .find(|provider| provider.name().eq_ignore_ascii_case(wanted))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
