use super::*;

/// Plain `fetch` through gloo-net.
pub(super) struct FetchBackend;

#[async_trait(?Send)]
impl HttpBackend for FetchBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut request_builder = match request.method {
            HttpMethod::Get => Request::get(&request.url),
            HttpMethod::Put => Request::put(&request.url),
        };
        for (header_name, header_value) in &request.headers {
            request_builder = request_builder.header(header_name, header_value);
        }

        let response = if let Some(body) = request.body.as_ref() {
            let request = request_builder
                .body(body.as_str())
                .map_err(|error| TransportError::Request(error.to_string()))?;
            request.send().await.map_err(map_network_error)?
        } else {
            request_builder.send().await.map_err(map_network_error)?
        };

        let status = response.status();
        let status_text = response.status_text();
        let content_type = response.headers().get("content-type");
        let body = response.text().await.map_err(map_network_error)?;
        Ok(HttpResponse {
            status,
            status_text,
            content_type,
            body,
        })
    }
}

pub(super) fn map_network_error(error: gloo_net::Error) -> TransportError {
    TransportError::Network(error.to_string())
}

/// The host page's own authenticated request function, looked up on `window`
/// at call time so hosts may install it after the widget boots.
pub(super) struct HostFunctionBackend {
    global: String,
}

impl HostFunctionBackend {
    pub(super) fn new(global: &str) -> Self {
        Self {
            global: global.trim().to_string(),
        }
    }

    fn lookup(&self) -> Option<(web_sys::Window, js_sys::Function)> {
        if self.global.is_empty() {
            return None;
        }
        let window = web_sys::window()?;
        let function = js_sys::Reflect::get(&window, &JsValue::from_str(&self.global))
            .ok()?
            .dyn_into::<js_sys::Function>()
            .ok()?;
        Some((window, function))
    }
}

#[async_trait(?Send)]
impl HttpBackend for HostFunctionBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let Some((window, function)) = self.lookup() else {
            return Err(TransportError::Unavailable);
        };
        let options = request_options(request)?;
        let returned = function
            .call1(&window, &options)
            .map_err(|error| TransportError::Network(js_error_message(&error)))?;
        let resolved = match returned.dyn_into::<js_sys::Promise>() {
            Ok(promise) => JsFuture::from(promise)
                .await
                .map_err(|error| TransportError::Network(js_error_message(&error)))?,
            Err(value) => value,
        };
        Ok(response_from_host(&resolved))
    }
}

fn request_options(request: &HttpRequest) -> Result<js_sys::Object, TransportError> {
    let set = |target: &js_sys::Object, key: &str, value: &JsValue| {
        js_sys::Reflect::set(target, &JsValue::from_str(key), value)
            .map(|_| ())
            .map_err(|error| TransportError::Request(js_error_message(&error)))
    };

    let options = js_sys::Object::new();
    set(&options, "url", &JsValue::from_str(&request.url))?;
    set(&options, "method", &JsValue::from_str(request.method.as_str()))?;
    if let Some(body) = request.body.as_deref() {
        set(&options, "body", &JsValue::from_str(body))?;
    }
    let headers = js_sys::Object::new();
    for (name, value) in &request.headers {
        set(&headers, name, &JsValue::from_str(value))?;
    }
    set(&options, "headers", &headers)?;
    Ok(options)
}

/// Hosts usually resolve with the response text. Richer hosts may resolve with
/// `{ status, statusText, contentType, body }`.
fn response_from_host(value: &JsValue) -> HttpResponse {
    if let Some(text) = value.as_string() {
        return HttpResponse::text_only(text);
    }
    if value.is_undefined() || value.is_null() {
        return HttpResponse::text_only(String::new());
    }

    let field = |name: &str| js_sys::Reflect::get(value, &JsValue::from_str(name)).ok();
    let text_field = |name: &str| field(name).and_then(|value| value.as_string());
    let body = text_field("body").or_else(|| text_field("text"));
    let Some(body) = body else {
        // Not a response envelope; hand back its JSON form.
        let body = js_sys::JSON::stringify(value)
            .ok()
            .and_then(|json| json.as_string())
            .unwrap_or_default();
        return HttpResponse::text_only(body);
    };

    let status = field("status")
        .and_then(|status| status.as_f64())
        .filter(|status| status.is_finite() && (100.0..=599.0).contains(status))
        .map_or(200, |status| status as u16);
    let mut response = HttpResponse::new(status, body);
    response.status_text = text_field("statusText").unwrap_or_default();
    response.content_type = text_field("contentType");
    response
}
