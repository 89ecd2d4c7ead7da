//! C8 — Rule / Handler Binder.
//!
//! Grounded on `crow::TaggedRule<Args...>`/`DynamicRule` in
//! `examples/original_source/crow/include/crow/routing.h`: a rule is a
//! (pattern, methods, handler) tuple where the handler's argument list is
//! checked against the pattern's typed holes before it is ever called.
//! C++ does this at template-instantiation time; here the same contract is
//! expressed with a small family of marker traits implemented for tuples of
//! `FromHole` types, checked once at registration (spec §4.8).

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_tungstenite::WebSocketStream;

use crate::adaptor::Adaptor;
use crate::error::RegistrationFault;
use crate::params::Params;
use crate::privilege::PrivilegeSet;
use crate::request::{Method, Request};
use crate::response::Response;

/// The five hole kinds the pattern grammar recognizes. `Path` is folded
/// into `String` here: both ultimately hand the handler a `String`, and
/// differ only in how the trie matches them, not in the value's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleKind {
    Int,
    Uint,
    Double,
    String,
}

/// Parses a pattern's ordered hole-kind sequence, the same grammar
/// `Trie::add` walks.
pub fn hole_kinds(pattern: &str) -> Vec<HoleKind> {
    const TOKENS: &[(&str, HoleKind)] = &[
        ("<int>", HoleKind::Int),
        ("<uint>", HoleKind::Uint),
        ("<float>", HoleKind::Double),
        ("<double>", HoleKind::Double),
        ("<str>", HoleKind::String),
        ("<string>", HoleKind::String),
        ("<path>", HoleKind::String),
    ];
    let mut kinds = Vec::new();
    let mut i = 0;
    let bytes = pattern.as_bytes();
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some((token, kind)) = TOKENS.iter().find(|(t, _)| pattern[i..].starts_with(t)) {
                kinds.push(*kind);
                i += token.len();
                continue;
            }
        }
        i += 1;
    }
    kinds
}

/// Tracks how far each typed slot of a [`Params`] bundle has been
/// consumed while binding a handler's arguments in pattern order.
pub struct Cursor<'a> {
    params: &'a Params,
    int_pos: usize,
    uint_pos: usize,
    double_pos: usize,
    string_pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(params: &'a Params) -> Self {
        Self { params, int_pos: 0, uint_pos: 0, double_pos: 0, string_pos: 0 }
    }
}

/// Implemented by the four concrete types a typed hole can bind to.
pub trait FromHole: Sized + Send + Sync + 'static {
    const KIND: HoleKind;
    fn take(cursor: &mut Cursor<'_>) -> Self;
}

impl FromHole for i64 {
    const KIND: HoleKind = HoleKind::Int;
    fn take(cursor: &mut Cursor<'_>) -> Self {
        let v = cursor.params.ints[cursor.int_pos];
        cursor.int_pos += 1;
        v
    }
}

impl FromHole for u64 {
    const KIND: HoleKind = HoleKind::Uint;
    fn take(cursor: &mut Cursor<'_>) -> Self {
        let v = cursor.params.uints[cursor.uint_pos];
        cursor.uint_pos += 1;
        v
    }
}

impl FromHole for f64 {
    const KIND: HoleKind = HoleKind::Double;
    fn take(cursor: &mut Cursor<'_>) -> Self {
        let v = cursor.params.doubles[cursor.double_pos];
        cursor.double_pos += 1;
        v
    }
}

impl FromHole for String {
    const KIND: HoleKind = HoleKind::String;
    fn take(cursor: &mut Cursor<'_>) -> Self {
        let v = cursor.params.strings[cursor.string_pos].clone();
        cursor.string_pos += 1;
        v
    }
}

/// A handler return value, staged into the Response by a small result
/// trait (spec §4.8): string → text body, integer → status code, JSON
/// value → JSON body.
pub trait IntoHandlerResult {
    fn stage(self: Box<Self>, res: &mut Response);
}

impl IntoHandlerResult for String {
    fn stage(self: Box<Self>, res: &mut Response) {
        res.set_body(*self);
    }
}

impl IntoHandlerResult for &'static str {
    fn stage(self: Box<Self>, res: &mut Response) {
        res.set_body(self.to_string());
    }
}

impl IntoHandlerResult for u16 {
    fn stage(self: Box<Self>, res: &mut Response) {
        res.status = *self;
    }
}

impl IntoHandlerResult for serde_json::Value {
    fn stage(self: Box<Self>, res: &mut Response) {
        res.set_json(*self);
    }
}

type Invoker = Box<dyn Fn(&mut Request, &mut Response, &Params) + Send + Sync>;

/// `(typed_params...) -> result_value` form.
pub trait ValueHandler<Args>: Send + Sync + 'static {
    fn kinds() -> Vec<HoleKind>;
    fn call(&self, params: &Params) -> Box<dyn IntoHandlerResult>;
}

/// `(&Request, typed_params...) -> result_value` form.
pub trait RequestHandler<Args>: Send + Sync + 'static {
    fn kinds() -> Vec<HoleKind>;
    fn call(&self, req: &Request, params: &Params) -> Box<dyn IntoHandlerResult>;
}

/// `(&mut Request, &mut Response, typed_params...) -> ()` form; trusts the
/// handler to call `Response::end` itself (spec §4.8, third form).
pub trait FullHandler<Args>: Send + Sync + 'static {
    fn kinds() -> Vec<HoleKind>;
    fn call(&self, req: &mut Request, res: &mut Response, params: &Params);
}

macro_rules! impl_arity {
    ( $( $T:ident ),* ) => {
        #[allow(unused_parens, non_snake_case)]
        impl<F, R, $($T),*> ValueHandler<($($T,)*)> for F
        where
            F: Fn($($T),*) -> R + Send + Sync + 'static,
            R: IntoHandlerResult + 'static,
            $($T: FromHole),*
        {
            fn kinds() -> Vec<HoleKind> { vec![$($T::KIND),*] }
            #[allow(unused_mut, unused_variables)]
            fn call(&self, params: &Params) -> Box<dyn IntoHandlerResult> {
                let mut cursor = Cursor::new(params);
                $(let $T = $T::take(&mut cursor);)*
                Box::new((self)($($T),*))
            }
        }

        #[allow(unused_parens, non_snake_case)]
        impl<F, R, $($T),*> RequestHandler<($($T,)*)> for F
        where
            F: Fn(&Request, $($T),*) -> R + Send + Sync + 'static,
            R: IntoHandlerResult + 'static,
            $($T: FromHole),*
        {
            fn kinds() -> Vec<HoleKind> { vec![$($T::KIND),*] }
            #[allow(unused_mut, unused_variables)]
            fn call(&self, req: &Request, params: &Params) -> Box<dyn IntoHandlerResult> {
                let mut cursor = Cursor::new(params);
                $(let $T = $T::take(&mut cursor);)*
                Box::new((self)(req, $($T),*))
            }
        }

        #[allow(unused_parens, non_snake_case)]
        impl<F, $($T),*> FullHandler<($($T,)*)> for F
        where
            F: Fn(&mut Request, &mut Response, $($T),*) + Send + Sync + 'static,
            $($T: FromHole),*
        {
            fn kinds() -> Vec<HoleKind> { vec![$($T::KIND),*] }
            #[allow(unused_mut, unused_variables)]
            fn call(&self, req: &mut Request, res: &mut Response, params: &Params) {
                let mut cursor = Cursor::new(params);
                $(let $T = $T::take(&mut cursor);)*
                (self)(req, res, $($T),*)
            }
        }
    };
}

impl_arity!();
impl_arity!(T1);
impl_arity!(T1, T2);
impl_arity!(T1, T2, T3);
impl_arity!(T1, T2, T3, T4);

/// One bit per [`Method`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodMask(u16);

impl MethodMask {
    pub const NONE: MethodMask = MethodMask(0);

    pub fn with(mut self, method: Method) -> Self {
        self.0 |= method.bit();
        self
    }

    pub fn has(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }
}

/// A rule's handler is either an ordinary request/response invoker or a
/// WebSocket upgrade handler (spec §9: "Inheritance of rule types → tagged
/// variant. Rule variants are {HttpRule, UpgradeRule}; pick on dispatch.").
enum RuleBody {
    Http(Invoker),
    Upgrade(UpgradeInvoker),
}

/// Runs once the handshake response has been written and the adaptor has
/// been handed off; receives the parsed request (for any headers the
/// handler wants, e.g. `Sec-WebSocket-Protocol`), the matched path
/// parameters, and the live WebSocket stream.
pub type UpgradeInvoker =
    Arc<dyn Fn(Request, Params, WebSocketStream<Adaptor>) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Rule {
    pub pattern: String,
    pub methods: MethodMask,
    pub privileges: Vec<PrivilegeSet>,
    pub name: Option<String>,
    body: RuleBody,
}

impl Rule {
    fn check_kinds(pattern: &str, declared: Vec<HoleKind>) -> Result<(), RegistrationFault> {
        let expected = hole_kinds(pattern);
        if expected.len() != declared.len()
            || expected.iter().zip(declared.iter()).any(|(a, b)| a != b)
        {
            return Err(RegistrationFault::SignatureMismatch(pattern.to_string()));
        }
        Ok(())
    }

    pub fn new_value<F, Args>(
        pattern: impl Into<String>,
        methods: MethodMask,
        privileges: Vec<PrivilegeSet>,
        handler: F,
    ) -> Result<Rule, RegistrationFault>
    where
        F: ValueHandler<Args>,
    {
        let pattern = pattern.into();
        Self::check_kinds(&pattern, F::kinds())?;
        let invoke: Invoker = Box::new(move |_req, res, params| {
            handler.call(params).stage(res);
            res.end();
        });
        Ok(Rule { pattern, methods, privileges, name: None, body: RuleBody::Http(invoke) })
    }

    pub fn new_request<F, Args>(
        pattern: impl Into<String>,
        methods: MethodMask,
        privileges: Vec<PrivilegeSet>,
        handler: F,
    ) -> Result<Rule, RegistrationFault>
    where
        F: RequestHandler<Args>,
    {
        let pattern = pattern.into();
        Self::check_kinds(&pattern, F::kinds())?;
        let invoke: Invoker = Box::new(move |req, res, params| {
            handler.call(req, params).stage(res);
            res.end();
        });
        Ok(Rule { pattern, methods, privileges, name: None, body: RuleBody::Http(invoke) })
    }

    pub fn new_full<F, Args>(
        pattern: impl Into<String>,
        methods: MethodMask,
        privileges: Vec<PrivilegeSet>,
        handler: F,
    ) -> Result<Rule, RegistrationFault>
    where
        F: FullHandler<Args>,
    {
        let pattern = pattern.into();
        Self::check_kinds(&pattern, F::kinds())?;
        let invoke: Invoker = Box::new(move |req, res, params| handler.call(req, res, params));
        Ok(Rule { pattern, methods, privileges, name: None, body: RuleBody::Http(invoke) })
    }

    /// Registers a WebSocket upgrade handler (spec §6, §4.7). Bound to GET
    /// only; the binder does not check hole kinds here since the handler
    /// receives the whole `Params` bundle rather than individual typed
    /// arguments (spec §4.8 covers only the HTTP-rule handler forms).
    pub fn new_upgrade<F, Fut>(
        pattern: impl Into<String>,
        privileges: Vec<PrivilegeSet>,
        handler: F,
    ) -> Result<Rule, RegistrationFault>
    where
        F: Fn(Request, Params, WebSocketStream<Adaptor>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pattern = pattern.into();
        let upgrade: UpgradeInvoker = Arc::new(move |req, params, ws| Box::pin(handler(req, params, ws)));
        Ok(Rule {
            pattern,
            methods: MethodMask::default().with(Method::Get),
            privileges,
            name: None,
            body: RuleBody::Upgrade(upgrade),
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_upgrade(&self) -> bool {
        matches!(self.body, RuleBody::Upgrade(_))
    }

    /// Clones the upgrade handler's `Arc`. `None` for ordinary HTTP rules.
    pub fn upgrade_invoker(&self) -> Option<UpgradeInvoker> {
        match &self.body {
            RuleBody::Upgrade(invoker) => Some(invoker.clone()),
            RuleBody::Http(_) => None,
        }
    }

    /// Panics if called on an upgrade rule; callers must check
    /// [`Rule::is_upgrade`] first (mirrors the router's dispatch contract,
    /// which never reaches an upgrade rule through the ordinary path).
    pub fn invoke(&self, req: &mut Request, res: &mut Response, params: &Params) {
        match &self.body {
            RuleBody::Http(invoke) => invoke(req, res, params),
            RuleBody::Upgrade(_) => unreachable!("upgrade rules are dispatched via handle_upgrade"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_form_matches_signature() {
        let rule = Rule::new_value(
            "/redfish/v1/Chassis/<str>",
            MethodMask::default().with(Method::Get),
            vec![PrivilegeSet::NO_AUTH],
            |name: String| format!("chassis {name}"),
        )
        .unwrap();
        let mut req = Request::new(Method::Get, 11, "/redfish/v1/Chassis/1U");
        let mut res = Response::new();
        let mut params = Params::new();
        params.push_string("1U");
        rule.invoke(&mut req, &mut res, &params);
        assert!(res.completed);
    }

    #[test]
    fn signature_mismatch_rejected() {
        let result = Rule::new_value(
            "/redfish/v1/Chassis/<str>",
            MethodMask::default().with(Method::Get),
            vec![],
            |id: i64| id.to_string(),
        );
        assert!(matches!(result, Err(RegistrationFault::SignatureMismatch(_))));
    }

    #[test]
    fn full_form_does_not_auto_complete() {
        let rule = Rule::new_full(
            "/redfish/v1/Chassis",
            MethodMask::default().with(Method::Get),
            vec![],
            |_req: &mut Request, res: &mut Response| {
                res.set_body("deferred");
            },
        )
        .unwrap();
        let mut req = Request::new(Method::Get, 11, "/redfish/v1/Chassis");
        let mut res = Response::new();
        let params = Params::new();
        rule.invoke(&mut req, &mut res, &params);
        assert!(!res.completed);
    }

    #[test]
    fn method_mask_roundtrip() {
        let mask = MethodMask::default().with(Method::Get).with(Method::Head);
        assert!(mask.has(Method::Get));
        assert!(mask.has(Method::Head));
        assert!(!mask.has(Method::Post));
    }
}
