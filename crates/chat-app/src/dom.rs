//! Thin helpers over web-sys for the page wiring.

use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Blob, BlobPropertyBag, Document, Element, Event, EventTarget, HtmlAnchorElement, HtmlElement, Url};

/// Look up an element by id and cast it to the expected type.
pub fn by_id<T: JsCast>(document: &Document, id: &str) -> Result<T, JsValue> {
    document
        .get_element_by_id(id)
        .ok_or_else(|| JsValue::from_str(&format!("Element not found: #{}", id)))?
        .dyn_into::<T>()
        .map_err(|_| JsValue::from_str(&format!("Element #{} has an unexpected type", id)))
}

/// Attach an event listener for the lifetime of the page.
pub fn listen<F>(target: &EventTarget, event: &str, handler: F) -> Result<(), JsValue>
where
    F: FnMut(Event) + 'static,
{
    let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
    target.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())?;
    closure.forget();
    Ok(())
}

/// Nearest ancestor-or-self of the event target matching `selector`.
pub fn closest(event: &Event, selector: &str) -> Option<Element> {
    event
        .target()?
        .dyn_into::<Element>()
        .ok()?
        .closest(selector)
        .ok()
        .flatten()
}

pub fn set_class(element: &Element, class: &str, on: bool) -> Result<(), JsValue> {
    element.class_list().toggle_with_force(class, on)?;
    Ok(())
}

pub fn set_display(element: &HtmlElement, visible: bool, display: &str) {
    let value = if visible { display } else { "none" };
    if let Err(e) = element.style().set_property("display", value) {
        log::debug!("Could not set display: {:?}", e);
    }
}

pub fn scroll_to_bottom(element: &HtmlElement) {
    element.set_scroll_top(element.scroll_height());
}

/// Grow a textarea with its content.
pub fn autosize(element: &HtmlElement) {
    let style = element.style();
    let _ = style.set_property("height", "auto");
    let _ = style.set_property("height", &format!("{}px", element.scroll_height()));
}

/// Append `<tag class=..>` with the given inner HTML to `parent`.
pub fn append_html(
    document: &Document,
    parent: &Element,
    tag: &str,
    class: &str,
    html: &str,
) -> Result<Element, JsValue> {
    let element = document.create_element(tag)?;
    element.set_class_name(class);
    element.set_inner_html(html);
    parent.append_child(&element)?;
    Ok(element)
}

/// Offer `contents` as a file download.
pub fn download(document: &Document, filename: &str, contents: &str, mime: &str) -> Result<(), JsValue> {
    let parts = js_sys::Array::of1(&JsValue::from_str(contents));
    let options = BlobPropertyBag::new();
    options.set_type(mime);
    let blob = Blob::new_with_str_sequence_and_options(&parts, &options)?;
    let url = Url::create_object_url_with_blob(&blob)?;

    let anchor = document
        .create_element("a")?
        .dyn_into::<HtmlAnchorElement>()
        .map_err(JsValue::from)?;
    anchor.set_href(&url);
    anchor.set_download(filename);
    let body = document
        .body()
        .ok_or_else(|| JsValue::from_str("No document body"))?;
    body.append_child(&anchor)?;
    anchor.click();
    anchor.remove();
    Url::revoke_object_url(&url)
}
