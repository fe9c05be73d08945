//! Syntax highlighting through the page's highlight.js (`window.hljs`).
//!
//! Every binding catches JS exceptions, so a missing or broken hljs
//! surfaces as `Err` and the renderer falls back to escaped text.

use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;

use chat_core::ports::Highlighter;
use chat_types::{ChatError, Result};

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = hljs, js_name = getLanguage)]
    fn hljs_get_language(name: &str) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = hljs, js_name = highlight)]
    fn hljs_highlight(code: &str, options: &JsValue) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = hljs, js_name = highlightAuto)]
    fn hljs_highlight_auto(code: &str) -> std::result::Result<JsValue, JsValue>;
}

#[derive(Default)]
pub struct HljsHighlighter;

impl HljsHighlighter {
    pub fn new() -> Self {
        Self
    }
}

fn html_of(result: std::result::Result<JsValue, JsValue>) -> Result<String> {
    let result = result.map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
    Reflect::get(&result, &JsValue::from_str("value"))
        .ok()
        .and_then(|v| v.as_string())
        .ok_or_else(|| ChatError::JsInterop("highlight result has no value".to_string()))
}

impl Highlighter for HljsHighlighter {
    fn supports(&self, lang: &str) -> bool {
        matches!(hljs_get_language(lang), Ok(v) if !v.is_undefined() && !v.is_null())
    }

    fn highlight(&self, code: &str, lang: &str) -> Result<String> {
        let options = Object::new();
        Reflect::set(&options, &JsValue::from_str("language"), &JsValue::from_str(lang))
            .map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
        html_of(hljs_highlight(code, &options))
    }

    fn highlight_auto(&self, code: &str) -> Result<String> {
        html_of(hljs_highlight_auto(code))
    }
}
