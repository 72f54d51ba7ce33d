//! The allowlisted sandbox environment.
//!
//! Global builtins mirror the names node code is allowed to call (`abs`,
//! `len`, `sum`, `sorted`, ...); the safe modules (`math`, `statistics`,
//! `json`, `re`, ...) are registered as static modules addressed
//! `module::item`. Nothing here touches the filesystem, network, clock or OS
//! entropy; `random` is a pure function of an explicit seed so repeated DAG
//! executions stay identical.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, Module, NativeCallContext, Position,
};
use std::cmp::Ordering;

type FnResult<T> = Result<T, Box<EvalAltResult>>;

pub(crate) fn runtime_err(msg: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(msg.into()),
        Position::NONE,
    ))
}

/// Truthiness in the Python sense: empty collections, zero and unit are
/// false, everything else true.
pub(crate) fn truthy(v: &Dynamic) -> bool {
    if v.is_unit() {
        return false;
    }
    if let Ok(b) = v.as_bool() {
        return b;
    }
    if let Ok(i) = v.as_int() {
        return i != 0;
    }
    if let Ok(f) = v.as_float() {
        return f != 0.0;
    }
    if v.is_string() {
        return v.clone().into_string().map(|s| !s.is_empty()).unwrap_or(false);
    }
    if let Some(arr) = v.read_lock::<Array>() {
        return !arr.is_empty();
    }
    if let Some(map) = v.read_lock::<Map>() {
        return !map.is_empty();
    }
    true
}

fn as_num(v: &Dynamic) -> Option<f64> {
    v.as_int()
        .ok()
        .map(|i| i as f64)
        .or_else(|| v.as_float().ok())
}

pub(crate) fn cmp_dynamic(a: &Dynamic, b: &Dynamic) -> Ordering {
    match (as_num(a), as_num(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn python_type_name(v: &Dynamic) -> String {
    if v.is_unit() {
        "NoneType".to_string()
    } else if v.is_bool() {
        "bool".to_string()
    } else if v.is_int() {
        "int".to_string()
    } else if v.is_float() {
        "float".to_string()
    } else if v.is_string() {
        "str".to_string()
    } else if v.is_array() {
        "list".to_string()
    } else if v.is_map() {
        "dict".to_string()
    } else {
        v.type_name().to_string()
    }
}

fn fnv1a64(text: &str) -> i64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash as i64
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e3779b97f4a7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

fn number_list(arr: &Array, what: &str) -> FnResult<Vec<f64>> {
    arr.iter()
        .map(|v| {
            as_num(v).ok_or_else(|| {
                runtime_err(format!(
                    "TypeError: {what} expects numbers, got {}",
                    python_type_name(v)
                ))
            })
        })
        .collect()
}

/// Register the global allowlisted builtins on a sandbox engine.
pub fn register_builtins(engine: &mut Engine) {
    // Arithmetic / conversion primitives.
    engine.register_fn("abs", |x: i64| x.abs());
    engine.register_fn("abs", |x: f64| x.abs());
    engine.register_fn("bin", |x: i64| format!("{x:#b}"));
    engine.register_fn("hex", |x: i64| format!("{x:#x}"));
    engine.register_fn("oct", |x: i64| format!("{x:#o}"));
    engine.register_fn("bool", |x: Dynamic| truthy(&x));
    engine.register_fn("chr", |x: i64| -> FnResult<String> {
        u32::try_from(x)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| runtime_err(format!("ValueError: chr() arg {x} out of range")))
    });
    engine.register_fn("ord", |s: &str| -> FnResult<i64> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c as i64),
            _ => Err(runtime_err(
                "TypeError: ord() expects a single character".to_string(),
            )),
        }
    });
    engine.register_fn("divmod", |a: i64, b: i64| -> FnResult<Array> {
        if b == 0 {
            return Err(runtime_err("ZeroDivisionError: integer division by zero"));
        }
        Ok(vec![
            Dynamic::from(a.div_euclid(b)),
            Dynamic::from(a.rem_euclid(b)),
        ])
    });
    engine.register_fn("float", |x: Dynamic| -> FnResult<f64> {
        if let Some(n) = as_num(&x) {
            return Ok(n);
        }
        if x.is_string() {
            let s = x.into_string().unwrap_or_default();
            return s
                .trim()
                .parse::<f64>()
                .map_err(|_| runtime_err(format!("ValueError: cannot convert {s:?} to float")));
        }
        Err(runtime_err(format!(
            "TypeError: cannot convert {} to float",
            python_type_name(&x)
        )))
    });
    engine.register_fn("int", |x: Dynamic| -> FnResult<i64> {
        if let Ok(i) = x.as_int() {
            return Ok(i);
        }
        if let Ok(f) = x.as_float() {
            return Ok(f.trunc() as i64);
        }
        if let Ok(b) = x.as_bool() {
            return Ok(i64::from(b));
        }
        if x.is_string() {
            let s = x.into_string().unwrap_or_default();
            return s
                .trim()
                .parse::<i64>()
                .map_err(|_| runtime_err(format!("ValueError: cannot convert {s:?} to int")));
        }
        Err(runtime_err(format!(
            "TypeError: cannot convert {} to int",
            python_type_name(&x)
        )))
    });
    engine.register_fn("str", |x: Dynamic| x.to_string());
    engine.register_fn("repr", |x: Dynamic| {
        if x.is_string() {
            format!("{:?}", x.to_string())
        } else {
            x.to_string()
        }
    });
    engine.register_fn("hash", |x: Dynamic| fnv1a64(&x.to_string()));
    engine.register_fn("pow", |a: i64, b: i64| -> FnResult<Dynamic> {
        if b >= 0 {
            u32::try_from(b)
                .ok()
                .and_then(|e| a.checked_pow(e))
                .map(Dynamic::from)
                .ok_or_else(|| runtime_err("ValueError: pow() overflow"))
        } else {
            Ok(Dynamic::from((a as f64).powi(b as i32)))
        }
    });
    engine.register_fn("pow", |a: f64, b: f64| a.powf(b));
    engine.register_fn("round", |x: f64| x.round() as i64);
    engine.register_fn("round", |x: f64, digits: i64| {
        let factor = 10f64.powi(digits as i32);
        (x * factor).round() / factor
    });
    engine.register_fn("round", |x: i64| x);
    engine.register_fn("format", |template: &str, args: Array| {
        let mut out = String::new();
        let mut values = args.into_iter();
        let mut rest = template;
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            match values.next() {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push_str("{}"),
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    });

    // Collection constructors and operations.
    engine.register_fn("dict", Map::new);
    engine.register_fn("list", |x: Dynamic| -> FnResult<Array> {
        if let Some(arr) = x.read_lock::<Array>() {
            return Ok(arr.clone());
        }
        if x.is_string() {
            return Ok(x
                .into_string()
                .unwrap_or_default()
                .chars()
                .map(|c| Dynamic::from(c.to_string()))
                .collect());
        }
        Err(runtime_err(format!(
            "TypeError: cannot convert {} to list",
            python_type_name(&x)
        )))
    });
    engine.register_fn("tuple", |arr: Array| arr);
    engine.register_fn("set", dedup_array);
    engine.register_fn("frozenset", dedup_array);
    engine.register_fn("slice", |arr: Array, start: i64, end: i64| -> Array {
        let len = arr.len() as i64;
        let clamp = |i: i64| -> usize {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len) as usize
        };
        let (s, e) = (clamp(start), clamp(end));
        if s >= e {
            Vec::new()
        } else {
            arr[s..e].to_vec()
        }
    });
    engine.register_fn("len", |arr: Array| arr.len() as i64);
    engine.register_fn("len", |map: Map| map.len() as i64);
    engine.register_fn("len", |s: &str| s.chars().count() as i64);
    engine.register_fn("sorted", |mut arr: Array| {
        arr.sort_by(cmp_dynamic);
        arr
    });
    engine.register_fn("reversed", |mut arr: Array| {
        arr.reverse();
        arr
    });
    engine.register_fn("enumerate", |arr: Array| -> Array {
        arr.into_iter()
            .enumerate()
            .map(|(i, v)| Dynamic::from(vec![Dynamic::from(i as i64), v]))
            .collect()
    });
    engine.register_fn("zip", |a: Array, b: Array| -> Array {
        a.into_iter()
            .zip(b)
            .map(|(x, y)| Dynamic::from(vec![x, y]))
            .collect()
    });
    engine.register_fn(
        "map",
        |ctx: NativeCallContext, f: FnPtr, arr: Array| -> FnResult<Array> {
            arr.into_iter()
                .map(|v| f.call_within_context(&ctx, (v,)))
                .collect()
        },
    );
    engine.register_fn(
        "filter",
        |ctx: NativeCallContext, f: FnPtr, arr: Array| -> FnResult<Array> {
            let mut out = Vec::new();
            for v in arr {
                let keep: Dynamic = f.call_within_context(&ctx, (v.clone(),))?;
                if truthy(&keep) {
                    out.push(v);
                }
            }
            Ok(out)
        },
    );
    engine.register_fn("iter", |arr: Array| arr);
    engine.register_fn("next", |arr: Array| -> FnResult<Dynamic> {
        arr.into_iter()
            .next()
            .ok_or_else(|| runtime_err("StopIteration: empty sequence"))
    });
    engine.register_fn("all", |arr: Array| arr.iter().all(truthy));
    engine.register_fn("any", |arr: Array| arr.iter().any(truthy));
    engine.register_fn("sum", |arr: Array| -> FnResult<Dynamic> {
        let mut int_acc: i64 = 0;
        let mut float_acc: f64 = 0.0;
        let mut any_float = false;
        for v in &arr {
            if let Ok(i) = v.as_int() {
                int_acc = int_acc.wrapping_add(i);
                float_acc += i as f64;
            } else if let Ok(f) = v.as_float() {
                any_float = true;
                float_acc += f;
            } else {
                return Err(runtime_err(format!(
                    "TypeError: sum() expects numbers, got {}",
                    python_type_name(v)
                )));
            }
        }
        Ok(if any_float {
            Dynamic::from(float_acc)
        } else {
            Dynamic::from(int_acc)
        })
    });
    engine.register_fn("max", |arr: Array| -> FnResult<Dynamic> {
        arr.into_iter()
            .max_by(|a, b| cmp_dynamic(a, b))
            .ok_or_else(|| runtime_err("ValueError: max() arg is an empty sequence"))
    });
    engine.register_fn("min", |arr: Array| -> FnResult<Dynamic> {
        arr.into_iter()
            .min_by(|a, b| cmp_dynamic(a, b))
            .ok_or_else(|| runtime_err("ValueError: min() arg is an empty sequence"))
    });
    engine.register_fn("max", |a: Dynamic, b: Dynamic| -> Dynamic {
        if cmp_dynamic(&a, &b) == Ordering::Less {
            b
        } else {
            a
        }
    });
    engine.register_fn("min", |a: Dynamic, b: Dynamic| -> Dynamic {
        if cmp_dynamic(&a, &b) == Ordering::Greater {
            b
        } else {
            a
        }
    });

    // Type predicates.
    engine.register_fn("type", |x: Dynamic| python_type_name(&x));
    engine.register_fn("isinstance", |x: Dynamic, ty: &str| -> bool {
        let name = python_type_name(&x);
        match ty {
            "number" => name == "int" || name == "float",
            other => name == other,
        }
    });
    engine.register_fn("issubclass", |a: &str, b: &str| {
        a == b || (b == "number" && (a == "int" || a == "float"))
    });
    engine.register_fn("hasattr", |map: Map, key: &str| map.contains_key(key));
    engine.register_fn("getattr", |map: Map, key: &str| -> FnResult<Dynamic> {
        map.get(key)
            .cloned()
            .ok_or_else(|| runtime_err(format!("KeyError: {key}")))
    });
    engine.register_fn("getattr", |map: Map, key: &str, default: Dynamic| {
        map.get(key).cloned().unwrap_or(default)
    });

    // I/O stub: output goes to structured logs, never to the host stdout.
    engine.register_fn("print", |x: Dynamic| {
        tracing::debug!(target: "dagprobe::sandbox", output = %x, "node print");
    });
    engine.on_print(|text| {
        tracing::debug!(target: "dagprobe::sandbox", output = %text, "node print");
    });
    engine.on_debug(|text, _, _| {
        tracing::debug!(target: "dagprobe::sandbox", output = %text, "node debug");
    });

    // Exception constructors: `throw ValueError("...")` yields the
    // `<class>: <message>` shape the execution contract reports.
    for class in [
        "ValueError",
        "TypeError",
        "KeyError",
        "IndexError",
        "AttributeError",
        "StopIteration",
        "ZeroDivisionError",
        "Exception",
    ] {
        let name = class.to_string();
        engine.register_fn(class, move |msg: &str| format!("{name}: {msg}"));
    }
}

fn dedup_array(arr: Array) -> Array {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for v in arr {
        if seen.insert(v.to_string()) {
            out.push(v);
        }
    }
    out
}

/// Register the safe static modules on a sandbox engine.
pub fn register_modules(engine: &mut Engine) {
    engine.register_static_module("math", math_module().into());
    engine.register_static_module("statistics", statistics_module().into());
    engine.register_static_module("collections", collections_module().into());
    engine.register_static_module("itertools", itertools_module().into());
    engine.register_static_module("functools", functools_module().into());
    engine.register_static_module("json", json_module().into());
    engine.register_static_module("re", re_module().into());
    engine.register_static_module("datetime", datetime_module().into());
    engine.register_static_module("decimal", decimal_module().into());
    engine.register_static_module("fractions", fractions_module().into());
    engine.register_static_module("random", random_module().into());
    engine.register_static_module("operator", operator_module().into());
    engine.register_static_module("string", string_module().into());
}

fn math_module() -> Module {
    let mut m = Module::new();
    m.set_var("pi", std::f64::consts::PI);
    m.set_var("e", std::f64::consts::E);
    m.set_var("tau", std::f64::consts::TAU);
    m.set_native_fn("sqrt", |x: f64| Ok(x.sqrt()));
    m.set_native_fn("sqrt", |x: i64| Ok((x as f64).sqrt()));
    m.set_native_fn("floor", |x: f64| Ok(x.floor() as i64));
    m.set_native_fn("ceil", |x: f64| Ok(x.ceil() as i64));
    m.set_native_fn("trunc", |x: f64| Ok(x.trunc() as i64));
    m.set_native_fn("fabs", |x: f64| Ok(x.abs()));
    m.set_native_fn("exp", |x: f64| Ok(x.exp()));
    m.set_native_fn("log", |x: f64| Ok(x.ln()));
    m.set_native_fn("log", |x: f64, base: f64| Ok(x.log(base)));
    m.set_native_fn("log10", |x: f64| Ok(x.log10()));
    m.set_native_fn("log2", |x: f64| Ok(x.log2()));
    m.set_native_fn("sin", |x: f64| Ok(x.sin()));
    m.set_native_fn("cos", |x: f64| Ok(x.cos()));
    m.set_native_fn("tan", |x: f64| Ok(x.tan()));
    m.set_native_fn("pow", |a: f64, b: f64| Ok(a.powf(b)));
    m.set_native_fn("fmod", |a: f64, b: f64| {
        if b == 0.0 {
            Err(runtime_err("ZeroDivisionError: fmod by zero"))
        } else {
            Ok(a % b)
        }
    });
    m.set_native_fn("gcd", |a: i64, b: i64| Ok(gcd(a.abs(), b.abs())));
    m
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn statistics_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("mean", |arr: Array| {
        let nums = number_list(&arr, "statistics::mean")?;
        if nums.is_empty() {
            return Err(runtime_err("ValueError: mean of empty sequence"));
        }
        Ok(nums.iter().sum::<f64>() / nums.len() as f64)
    });
    m.set_native_fn("median", |arr: Array| {
        let mut nums = number_list(&arr, "statistics::median")?;
        if nums.is_empty() {
            return Err(runtime_err("ValueError: median of empty sequence"));
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let mid = nums.len() / 2;
        Ok(if nums.len() % 2 == 0 {
            (nums[mid - 1] + nums[mid]) / 2.0
        } else {
            nums[mid]
        })
    });
    m.set_native_fn("variance", |arr: Array| sample_variance(&arr, false));
    m.set_native_fn("stdev", |arr: Array| {
        sample_variance(&arr, false).map(f64::sqrt)
    });
    m.set_native_fn("pvariance", |arr: Array| sample_variance(&arr, true));
    m.set_native_fn("pstdev", |arr: Array| {
        sample_variance(&arr, true).map(f64::sqrt)
    });
    m.set_native_fn("mode", |arr: Array| -> FnResult<Dynamic> {
        let mut counts: Vec<(String, Dynamic, usize)> = Vec::new();
        for v in &arr {
            let key = v.to_string();
            match counts.iter_mut().find(|(k, _, _)| *k == key) {
                Some(entry) => entry.2 += 1,
                None => counts.push((key, v.clone(), 1)),
            }
        }
        counts
            .into_iter()
            .max_by_key(|(_, _, n)| *n)
            .map(|(_, v, _)| v)
            .ok_or_else(|| runtime_err("ValueError: mode of empty sequence"))
    });
    m
}

fn sample_variance(arr: &Array, population: bool) -> FnResult<f64> {
    let nums = number_list(arr, "statistics::variance")?;
    let denom = if population {
        nums.len()
    } else {
        nums.len().saturating_sub(1)
    };
    if denom == 0 {
        return Err(runtime_err(
            "ValueError: variance requires at least two data points",
        ));
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    Ok(nums.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / denom as f64)
}

fn collections_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("counter", |arr: Array| {
        let mut map = Map::new();
        for v in arr {
            let key = v.to_string();
            let count = map.get(key.as_str()).and_then(|d| d.as_int().ok()).unwrap_or(0);
            map.insert(key.into(), Dynamic::from(count + 1));
        }
        Ok(map)
    });
    m.set_native_fn("keys", |map: Map| {
        Ok(map
            .keys()
            .map(|k| Dynamic::from(k.to_string()))
            .collect::<Array>())
    });
    m.set_native_fn("values", |map: Map| {
        Ok(map.values().cloned().collect::<Array>())
    });
    m.set_native_fn("items", |map: Map| {
        Ok(map
            .into_iter()
            .map(|(k, v)| Dynamic::from(vec![Dynamic::from(k.to_string()), v]))
            .collect::<Array>())
    });
    m
}

fn itertools_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("chain", |a: Array, b: Array| {
        Ok(a.into_iter().chain(b).collect::<Array>())
    });
    m.set_native_fn("flatten", |arr: Array| {
        let mut out = Array::new();
        for v in arr {
            match v.try_cast::<Array>() {
                Some(inner) => out.extend(inner),
                None => return Err(runtime_err("TypeError: flatten expects a list of lists")),
            }
        }
        Ok(out)
    });
    m.set_native_fn("unique", |arr: Array| Ok(dedup_array(arr)));
    m.set_native_fn("pairwise", |arr: Array| {
        Ok(arr
            .windows(2)
            .map(|w| Dynamic::from(vec![w[0].clone(), w[1].clone()]))
            .collect::<Array>())
    });
    m.set_native_fn("product", |a: Array, b: Array| {
        let mut out = Array::new();
        for x in &a {
            for y in &b {
                out.push(Dynamic::from(vec![x.clone(), y.clone()]));
            }
        }
        Ok(out)
    });
    m.set_native_fn("repeat", |x: Dynamic, n: i64| -> FnResult<Array> {
        if !(0..=100_000).contains(&n) {
            return Err(runtime_err("ValueError: repeat count out of range"));
        }
        Ok((0..n).map(|_| x.clone()).collect())
    });
    m
}

fn functools_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn(
        "reduce",
        |ctx: NativeCallContext, f: FnPtr, arr: Array, init: Dynamic| {
            let mut acc = init;
            for v in arr {
                acc = f.call_within_context(&ctx, (acc, v))?;
            }
            Ok(acc)
        },
    );
    m
}

fn json_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("dumps", |v: Dynamic| {
        let value: serde_json::Value = rhai::serde::from_dynamic(&v)
            .map_err(|e| runtime_err(format!("ValueError: {e}")))?;
        serde_json::to_string(&value).map_err(|e| runtime_err(format!("ValueError: {e}")))
    });
    m.set_native_fn("loads", |s: &str| {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| runtime_err(format!("ValueError: {e}")))?;
        rhai::serde::to_dynamic(&value).map_err(|e| runtime_err(format!("ValueError: {e}")))
    });
    m
}

fn compile_pattern(pattern: &str) -> FnResult<Regex> {
    Regex::new(pattern).map_err(|e| runtime_err(format!("ValueError: invalid pattern: {e}")))
}

fn re_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("is_match", |pattern: &str, text: &str| {
        Ok(compile_pattern(pattern)?.is_match(text))
    });
    m.set_native_fn("find", |pattern: &str, text: &str| -> FnResult<Dynamic> {
        Ok(compile_pattern(pattern)?
            .find(text)
            .map(|mat| Dynamic::from(mat.as_str().to_string()))
            .unwrap_or(Dynamic::UNIT))
    });
    m.set_native_fn("find_all", |pattern: &str, text: &str| -> FnResult<Array> {
        Ok(compile_pattern(pattern)?
            .find_iter(text)
            .map(|mat| Dynamic::from(mat.as_str().to_string()))
            .collect())
    });
    m.set_native_fn("replace", |pattern: &str, text: &str, rep: &str| {
        Ok(compile_pattern(pattern)?.replace_all(text, rep).into_owned())
    });
    m.set_native_fn("split", |pattern: &str, text: &str| -> FnResult<Array> {
        Ok(compile_pattern(pattern)?
            .split(text)
            .map(|part| Dynamic::from(part.to_string()))
            .collect())
    });
    m
}

fn datetime_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("parse", |text: &str, fmt: &str| {
        let dt = parse_datetime(text, fmt)?;
        let mut map = Map::new();
        let date = dt.date();
        map.insert("year".into(), Dynamic::from(chrono::Datelike::year(&date) as i64));
        map.insert("month".into(), Dynamic::from(chrono::Datelike::month(&date) as i64));
        map.insert("day".into(), Dynamic::from(chrono::Datelike::day(&date) as i64));
        map.insert("hour".into(), Dynamic::from(dt.hour() as i64));
        map.insert("minute".into(), Dynamic::from(dt.minute() as i64));
        map.insert("second".into(), Dynamic::from(dt.second() as i64));
        Ok(map)
    });
    m.set_native_fn("timestamp", |text: &str, fmt: &str| {
        Ok(parse_datetime(text, fmt)?.and_utc().timestamp())
    });
    m.set_native_fn("format", |timestamp: i64, fmt: &str| {
        DateTime::from_timestamp(timestamp, 0)
            .map(|dt| dt.format(fmt).to_string())
            .ok_or_else(|| runtime_err(format!("ValueError: timestamp {timestamp} out of range")))
    });
    m.set_native_fn("diff_days", |a: &str, b: &str, fmt: &str| {
        let start = parse_datetime(a, fmt)?;
        let end = parse_datetime(b, fmt)?;
        Ok((end - start).num_days())
    });
    m
}

fn parse_datetime(text: &str, fmt: &str) -> FnResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, fmt)
        .or_else(|_| {
            NaiveDate::parse_from_str(text, fmt).map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|e| runtime_err(format!("ValueError: cannot parse {text:?} with {fmt:?}: {e}")))
}

fn decimal_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("round_to", |x: f64, digits: i64| {
        let factor = 10f64.powi(digits as i32);
        Ok((x * factor).round() / factor)
    });
    m.set_native_fn("from_str", |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| runtime_err(format!("ValueError: cannot parse {s:?} as decimal")))
    });
    m
}

fn fractions_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("gcd", |a: i64, b: i64| Ok(gcd(a.abs(), b.abs())));
    m.set_native_fn("simplify", |n: i64, d: i64| -> FnResult<Array> {
        if d == 0 {
            return Err(runtime_err("ZeroDivisionError: fraction with zero denominator"));
        }
        let g = gcd(n.abs(), d.abs()).max(1);
        Ok(vec![Dynamic::from(n / g), Dynamic::from(d / g)])
    });
    m
}

fn random_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("next_float", |seed: i64| {
        let mut state = seed as u64;
        Ok((splitmix64(&mut state) >> 11) as f64 / (1u64 << 53) as f64)
    });
    m.set_native_fn("next_int", |seed: i64, lo: i64, hi: i64| -> FnResult<i64> {
        if lo >= hi {
            return Err(runtime_err("ValueError: empty range for next_int"));
        }
        let mut state = seed as u64;
        let span = (hi - lo) as u64;
        Ok(lo + (splitmix64(&mut state) % span) as i64)
    });
    m.set_native_fn("choice", |seed: i64, arr: Array| -> FnResult<Dynamic> {
        if arr.is_empty() {
            return Err(runtime_err("IndexError: choice from empty sequence"));
        }
        let mut state = seed as u64;
        let idx = (splitmix64(&mut state) % arr.len() as u64) as usize;
        Ok(arr[idx].clone())
    });
    m.set_native_fn("shuffle", |seed: i64, mut arr: Array| -> FnResult<Array> {
        let mut state = seed as u64;
        for i in (1..arr.len()).rev() {
            let j = (splitmix64(&mut state) % (i as u64 + 1)) as usize;
            arr.swap(i, j);
        }
        Ok(arr)
    });
    m
}

fn operator_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("add", |a: i64, b: i64| Ok(a.wrapping_add(b)));
    m.set_native_fn("add", |a: f64, b: f64| Ok(a + b));
    m.set_native_fn("sub", |a: i64, b: i64| Ok(a.wrapping_sub(b)));
    m.set_native_fn("sub", |a: f64, b: f64| Ok(a - b));
    m.set_native_fn("mul", |a: i64, b: i64| Ok(a.wrapping_mul(b)));
    m.set_native_fn("mul", |a: f64, b: f64| Ok(a * b));
    m.set_native_fn("truediv", |a: f64, b: f64| {
        if b == 0.0 {
            Err(runtime_err("ZeroDivisionError: division by zero"))
        } else {
            Ok(a / b)
        }
    });
    m.set_native_fn("truediv", |a: i64, b: i64| {
        if b == 0 {
            Err(runtime_err("ZeroDivisionError: division by zero"))
        } else {
            Ok(a as f64 / b as f64)
        }
    });
    m.set_native_fn("floordiv", |a: i64, b: i64| {
        if b == 0 {
            Err(runtime_err("ZeroDivisionError: integer division by zero"))
        } else {
            Ok(a.div_euclid(b))
        }
    });
    m.set_native_fn("neg", |a: i64| Ok(-a));
    m.set_native_fn("neg", |a: f64| Ok(-a));
    m.set_native_fn("eq", |a: Dynamic, b: Dynamic| {
        Ok(cmp_dynamic(&a, &b) == Ordering::Equal)
    });
    m.set_native_fn("lt", |a: Dynamic, b: Dynamic| {
        Ok(cmp_dynamic(&a, &b) == Ordering::Less)
    });
    m.set_native_fn("gt", |a: Dynamic, b: Dynamic| {
        Ok(cmp_dynamic(&a, &b) == Ordering::Greater)
    });
    m
}

fn string_module() -> Module {
    let mut m = Module::new();
    m.set_var("ascii_lowercase", "abcdefghijklmnopqrstuvwxyz".to_string());
    m.set_var("ascii_uppercase", "ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string());
    m.set_var("digits", "0123456789".to_string());
    m.set_var("punctuation", "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~".to_string());
    m.set_native_fn("capwords", |s: &str| {
        Ok(s.split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "))
    });
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy() {
        assert!(!truthy(&Dynamic::UNIT));
        assert!(!truthy(&Dynamic::from(0_i64)));
        assert!(!truthy(&Dynamic::from(String::new())));
        assert!(!truthy(&Dynamic::from(Array::new())));
        assert!(truthy(&Dynamic::from(1_i64)));
        assert!(truthy(&Dynamic::from("x".to_string())));
    }

    #[test]
    fn test_cmp_dynamic_numbers() {
        assert_eq!(
            cmp_dynamic(&Dynamic::from(1_i64), &Dynamic::from(2.5_f64)),
            Ordering::Less
        );
        assert_eq!(
            cmp_dynamic(&Dynamic::from(3_i64), &Dynamic::from(3.0_f64)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_fnv_is_stable() {
        assert_eq!(fnv1a64("abc"), fnv1a64("abc"));
        assert_ne!(fnv1a64("abc"), fnv1a64("abd"));
    }

    #[test]
    fn test_splitmix_is_deterministic() {
        let mut a = 42_u64;
        let mut b = 42_u64;
        assert_eq!(splitmix64(&mut a), splitmix64(&mut b));
    }
}
