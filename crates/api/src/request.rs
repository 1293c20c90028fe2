use std::marker::PhantomData;

use {reqwest::Method, serde_json::Value};

/// One outbound call and the response shape `T` it decodes into.
#[derive(Debug, Clone)]
pub struct ApiRequestSpec<T> {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    _shape: PhantomData<fn() -> T>,
}

impl<T> ApiRequestSpec<T> {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            _shape: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let spec = ApiRequestSpec::<Value>::get("/v1/vehicles")
            .with_query("page", "2")
            .with_query("limit", "50");
        assert_eq!(spec.method(), Method::GET);
        assert_eq!(spec.path(), "/v1/vehicles");
        assert_eq!(spec.query().len(), 2);
        assert!(spec.body().is_none());

        let spec = ApiRequestSpec::<()>::post("/v1/trips", serde_json::json!({"vin": "X"}));
        assert_eq!(spec.method(), Method::POST);
        assert_eq!(spec.body().unwrap()["vin"], "X");
    }
}
