/// Generates a typed client for one remote service.
///
/// ```ignore
/// mod users {
///     livebroker::live_ops! {
///         service "userService";
///
///         fn find_all() -> Vec<User> as "findAll" watching "com.acme.User[]";
///         fn find_by_name(name: String) -> Option<User> as "findByName" watching "com.acme.User";
///         fn rename(id: u64, name: String) -> User as "rename";
///     }
/// }
///
/// let users = users::Client::new(&broker);
/// let mut all = users.find_all();
/// ```
///
/// Each operation names the method on the wire and, for methods whose result
/// should be refreshed by push events, the entity type it returns. The macro
/// defines `SERVICE`, `method_types()` and a `Client` whose methods return
/// [`Typed`][crate::Typed] streams. `Client::new` registers the method types
/// with the broker.
#[macro_export]
macro_rules! live_ops {
    {
        service $service:literal;

        $(fn $op:ident ($($arg:ident: $arg_ty:ty),*) -> $ret_ty:ty as $wire:literal $(watching $entity:literal)?;)*
    } => {
        pub const SERVICE: &str = $service;

        pub fn method_types() -> $crate::MethodReturnTypes {
            #[allow(unused_mut)]
            let mut types = $crate::MethodReturnTypes::new();
            $($(types.insert($wire.to_owned(), $entity.to_owned());)?)*
            types
        }

        #[derive(Clone)]
        pub struct Client($crate::Broker);

        impl Client {
            pub fn new(broker: &$crate::Broker) -> Self {
                broker.register_method_types(SERVICE, method_types());
                Client(broker.clone())
            }

            $(
                pub fn $op(&self, $($arg: $arg_ty),*) -> $crate::Typed<$ret_ty> {
                    let args: ::std::result::Result<
                        ::std::vec::Vec<$crate::Value>,
                        $crate::serde_json::Error,
                    > = ::std::vec![$($crate::serde_json::to_value(&$arg)),*]
                        .into_iter()
                        .collect();
                    let sub = match args {
                        Ok(args) => self.0.subscribe(SERVICE, $wire, args),
                        Err(e) => $crate::Subscription::failed($crate::rpc::CallFailure::new(
                            format!("could not encode arguments of {}.{}: {}", SERVICE, $wire, e),
                        )),
                    };
                    sub.typed()
                }
            )*
        }
    }
}
