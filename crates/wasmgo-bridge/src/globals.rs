//! The global object graph a guest sees at startup.
//!
//! Only what the guest runtime's startup path dereferences is modelled:
//!
//! ```text
//! global
//! ├── Object, Array          opaque placeholders
//! ├── Uint8Array             constructible typed-array class
//! ├── process                undefined
//! ├── document.cookie
//! ├── window.crypto.getRandomValues
//! ├── navigator.userAgent
//! └── fs.constants           O_WRONLY O_RDWR O_CREAT O_TRUNC O_APPEND O_EXCL
//! ```

use wasmgo_types::{
    BridgeConfig, BridgeError, BridgeResult, HostValue, NativeFn, ObjectRef, TypedArrayRef,
};

/// Build a fresh global object for one bridge.
pub fn global_object(config: &BridgeConfig) -> ObjectRef {
    let document = ObjectRef::with_props(
        "document",
        [("cookie", HostValue::string(config.cookie.as_str()))],
    );
    let crypto = ObjectRef::with_props(
        "crypto",
        [(
            "getRandomValues",
            HostValue::Function(NativeFn::new("getRandomValues", get_random_values)),
        )],
    );
    let window = ObjectRef::with_props("window", [("crypto", HostValue::Object(crypto))]);
    let navigator = ObjectRef::with_props(
        "navigator",
        [("userAgent", HostValue::string(config.user_agent.as_str()))],
    );
    let constants = ObjectRef::with_props(
        "constants",
        open_flags()
            .into_iter()
            .map(|(name, value)| (name, HostValue::Number(value as f64))),
    );
    let fs = ObjectRef::with_props("fs", [("constants", HostValue::Object(constants))]);

    ObjectRef::with_props(
        "global",
        [
            ("Object", HostValue::Object(ObjectRef::new("Object"))),
            ("Array", HostValue::Object(ObjectRef::new("Array"))),
            ("Uint8Array", HostValue::Object(uint8_array_class())),
            ("process", HostValue::Undefined),
            ("document", HostValue::Object(document)),
            ("window", HostValue::Object(window)),
            ("navigator", HostValue::Object(navigator)),
            ("fs", HostValue::Object(fs)),
        ],
    )
}

/// The platform's file-open flags under their POSIX names.
pub fn open_flags() -> [(&'static str, i32); 6] {
    [
        ("O_WRONLY", libc::O_WRONLY),
        ("O_RDWR", libc::O_RDWR),
        ("O_CREAT", libc::O_CREAT),
        ("O_TRUNC", libc::O_TRUNC),
        ("O_APPEND", libc::O_APPEND),
        ("O_EXCL", libc::O_EXCL),
    ]
}

/// `Uint8Array`: `new Uint8Array(length)` or `new Uint8Array(buffer[, offset[, length]])`.
pub fn uint8_array_class() -> ObjectRef {
    ObjectRef::constructible("Uint8Array", |args| {
        let array = match args.first() {
            None | Some(HostValue::Undefined) => TypedArrayRef::new(0),
            Some(HostValue::Number(n)) => TypedArrayRef::new(array_length(*n)?),
            Some(HostValue::ArrayBuffer(buffer)) => {
                let offset = match args.get(1) {
                    Some(HostValue::Number(n)) => array_length(*n)?,
                    _ => 0,
                };
                let length = match args.get(2) {
                    Some(HostValue::Number(n)) => array_length(*n)?,
                    _ => buffer.len().saturating_sub(offset),
                };
                TypedArrayRef::view(buffer.clone(), offset, length)?
            }
            Some(other) => {
                return Err(BridgeError::protocol(
                    other,
                    "Uint8Array constructor expects a length or an array buffer",
                ))
            }
        };
        Ok(HostValue::TypedArray(array))
    })
}

fn array_length(n: f64) -> BridgeResult<usize> {
    if n.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&n) {
        return Err(BridgeError::protocol(n, "invalid typed array length"));
    }
    Ok(n as usize)
}

/// `crypto.getRandomValues(view)`: fill the view, return the same view.
fn get_random_values(args: &[HostValue]) -> BridgeResult<HostValue> {
    let target = args.first().cloned().unwrap_or(HostValue::Undefined);
    let HostValue::TypedArray(view) = &target else {
        return Err(BridgeError::protocol(
            &target,
            "getRandomValues expects a typed array",
        ));
    };
    view.with_bytes_mut(getrandom::getrandom)
        .map_err(|e| BridgeError::Host(format!("random source unavailable: {e}")))?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(obj: &ObjectRef, key: &str) -> ObjectRef {
        obj.lookup(key)
            .unwrap()
            .as_object()
            .cloned()
            .unwrap_or_else(|| panic!("{key} is not an object"))
    }

    #[test]
    fn global_graph_exposes_startup_properties() {
        let config = BridgeConfig {
            user_agent: "Blabla".into(),
            cookie: "test=1".into(),
            ..BridgeConfig::default()
        };
        let global = global_object(&config);
        assert_eq!(
            global.keys(),
            vec![
                "Array", "Object", "Uint8Array", "document", "fs", "navigator", "process",
                "window"
            ]
        );
        assert_eq!(global.lookup("process").unwrap(), HostValue::Undefined);
        assert_eq!(
            child(&global, "navigator").lookup("userAgent").unwrap(),
            HostValue::string("Blabla")
        );
        assert_eq!(
            child(&global, "document").lookup("cookie").unwrap(),
            HostValue::string("test=1")
        );
        let crypto = child(&child(&global, "window"), "crypto");
        assert!(matches!(
            crypto.lookup("getRandomValues").unwrap(),
            HostValue::Function(_)
        ));
    }

    #[test]
    fn fs_constants_match_platform() {
        let global = global_object(&BridgeConfig::default());
        let constants = child(&child(&global, "fs"), "constants");
        assert_eq!(
            constants.lookup("O_CREAT").unwrap(),
            HostValue::Number(libc::O_CREAT as f64)
        );
        assert_eq!(constants.keys().len(), 6);
    }

    #[test]
    fn placeholders_are_not_constructible() {
        let global = global_object(&BridgeConfig::default());
        assert!(!child(&global, "Object").is_constructible());
        assert!(!child(&global, "Array").is_constructible());
    }

    #[test]
    fn uint8_array_from_length() {
        let class = uint8_array_class();
        let value = class.construct(&[HostValue::Number(8.0)]).unwrap();
        let view = value.as_typed_array().unwrap();
        assert_eq!(view.len(), 8);
        assert_eq!(view.buffer().len(), 8);
        assert_eq!(view.to_js_string(), "0,0,0,0,0,0,0,0");
    }

    #[test]
    fn uint8_array_over_buffer() {
        let buffer = wasmgo_types::BufferRef::from_bytes(vec![1, 2, 3, 4, 5]);
        let class = uint8_array_class();
        let value = class
            .construct(&[
                HostValue::ArrayBuffer(buffer),
                HostValue::Number(1.0),
                HostValue::Number(3.0),
            ])
            .unwrap();
        assert_eq!(value.as_typed_array().unwrap().to_js_string(), "2,3,4");
    }

    #[test]
    fn uint8_array_rejects_bad_lengths() {
        let class = uint8_array_class();
        assert!(class.construct(&[HostValue::Number(-1.0)]).is_err());
        assert!(class.construct(&[HostValue::Number(1.5)]).is_err());
        assert!(class.construct(&[HostValue::string("8")]).is_err());
    }

    #[test]
    fn get_random_values_returns_same_view() {
        let view = HostValue::TypedArray(TypedArrayRef::new(32));
        let out = get_random_values(&[view.clone()]).unwrap();
        assert_eq!(out, view);
        // 32 zero bytes from a working random source is vanishingly unlikely.
        assert!(out.as_typed_array().unwrap().to_vec().iter().any(|b| *b != 0));
    }

    #[test]
    fn get_random_values_requires_typed_array() {
        assert!(get_random_values(&[HostValue::Number(1.0)]).is_err());
        assert!(get_random_values(&[]).is_err());
    }
}
