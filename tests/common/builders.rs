//! Test data builders for creating override sets

use camb_pipes::ParameterSet;

/// Builder for caller overrides with output switches
#[derive(Default)]
pub struct OverridesBuilder {
    params: ParameterSet,
}

impl OverridesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn switch(mut self, key: &str) -> Self {
        self.params.insert(key, "T");
        self
    }

    pub fn scalar(self) -> Self {
        self.switch("get_scalar_cls")
    }

    pub fn vector(self) -> Self {
        self.switch("get_vector_cls")
    }

    pub fn tensor(self) -> Self {
        self.switch("get_tensor_cls")
    }

    pub fn lensing(self) -> Self {
        self.switch("do_lensing")
    }

    pub fn transfer(self) -> Self {
        self.switch("get_transfer")
    }

    /// Every output switch on
    pub fn everything(self) -> Self {
        self.scalar().vector().tensor().lensing().transfer()
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key, value.to_string());
        self
    }

    pub fn build(self) -> ParameterSet {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_builder() {
        let params = OverridesBuilder::new().scalar().set("hubble", 68).build();

        assert_eq!(params.get("get_scalar_cls"), Some("T"));
        assert_eq!(params.get("hubble"), Some("68"));
        assert_eq!(params.len(), 2);
    }
}
