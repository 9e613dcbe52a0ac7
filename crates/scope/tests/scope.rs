use std::sync::Arc;
use tickwork_core::{Kind, TypeKey};
use tickwork_scope::{Erased, Factory, Param, Registration, Scope, ScopeBuilder, ScopeError};

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

#[derive(Debug)]
struct Config {
    name: String,
}

#[derive(Debug)]
struct Service {
    config: Arc<Config>,
}

struct English {
    word: String,
}

impl Greeter for English {
    fn greet(&self) -> String {
        self.word.clone()
    }
}

struct French;

impl Greeter for French {
    fn greet(&self) -> String {
        "bonjour".to_string()
    }
}

/// Base type of [`English`] in the tests below.
struct Phrase(String);

struct Chorus {
    voices: Vec<Arc<dyn Greeter>>,
}

#[derive(Debug, Default)]
struct Ticket;

fn config() -> Registration<Config> {
    Registration::<Config>::singleton().constructor(vec![], |_| {
        Ok(Config {
            name: "main".to_string(),
        })
    })
}

fn service() -> Registration<Service> {
    Registration::<Service>::singleton().constructor(vec![Param::one::<Config>()], |args| {
        Ok(Service {
            config: args.one::<Config>()?,
        })
    })
}

fn english() -> Registration<English> {
    Registration::<English>::singleton()
        .base::<Phrase, _>(|e: Arc<English>| Arc::new(Phrase(e.word.clone())))
        .implements::<dyn Greeter, _>(|e: Arc<English>| -> Arc<dyn Greeter> { e })
        .constructor(vec![], |_| {
            Ok(English {
                word: "hello".to_string(),
            })
        })
}

fn french() -> Registration<French> {
    Registration::<French>::singleton()
        .implements::<dyn Greeter, _>(|f: Arc<French>| -> Arc<dyn Greeter> { f })
        .constructor(vec![], |_| Ok(French))
}

fn chorus() -> Registration<Chorus> {
    Registration::<Chorus>::singleton().constructor(vec![Param::all::<dyn Greeter>()], |args| {
        Ok(Chorus {
            voices: args.all::<dyn Greeter>()?,
        })
    })
}

fn greetings(scope: &Scope) -> Vec<String> {
    scope
        .resolve_all::<dyn Greeter>()
        .unwrap()
        .iter()
        .map(|g| g.greet())
        .collect()
}

#[test]
fn test_singleton_is_cached() {
    let scope = Scope::builder().register(config()).build().unwrap();

    let first = scope.resolve::<Config>().unwrap();
    let second = scope.resolve::<Config>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name, "main");
}

#[test]
fn test_dependency_is_shared() {
    let scope = Scope::builder()
        .register(service())
        .register(config())
        .build()
        .unwrap();

    let service = scope.resolve::<Service>().unwrap();
    let config = scope.resolve::<Config>().unwrap();
    assert!(Arc::ptr_eq(&service.config, &config));
}

#[test]
fn test_resolve_through_trait() {
    let scope = Scope::builder().register(english()).build().unwrap();

    let greeter = scope.resolve::<dyn Greeter>().unwrap();
    assert_eq!(greeter.greet(), "hello");

    let key = scope.singleton_type_of(TypeKey::of::<dyn Greeter>()).unwrap();
    assert_eq!(key, TypeKey::of::<English>());
}

#[test]
fn test_trait_view_shares_instance() {
    let scope = Scope::builder().register(english()).build().unwrap();

    let concrete = scope.resolve_key(TypeKey::of::<English>()).unwrap();
    let via_trait = scope.resolve_key(TypeKey::of::<dyn Greeter>()).unwrap();
    assert!(concrete.ptr_eq(&via_trait));
}

#[test]
fn test_ambiguous_resolve_fails() {
    let scope = Scope::builder()
        .register(english())
        .register(french())
        .build()
        .unwrap();

    match scope.resolve::<dyn Greeter>() {
        Err(ScopeError::Ambiguous { matches, .. }) => {
            assert_eq!(matches, vec!["English".to_string(), "French".to_string()]);
        }
        _ => panic!("expected ambiguity"),
    }
}

#[test]
fn test_resolve_all_orders_by_priority_then_name() {
    let scope = Scope::builder()
        .register(french())
        .register(english())
        .build()
        .unwrap();
    assert_eq!(greetings(&scope), vec!["hello", "bonjour"]);

    let scope = Scope::builder()
        .register(french().priority(-5))
        .register(english())
        .build()
        .unwrap();
    assert_eq!(greetings(&scope), vec!["bonjour", "hello"]);
}

#[test]
fn test_collection_parameter() {
    let scope = Scope::builder()
        .register(chorus())
        .register(english())
        .register(french())
        .build()
        .unwrap();

    let chorus = scope.resolve::<Chorus>().unwrap();
    let voices: Vec<_> = chorus.voices.iter().map(|v| v.greet()).collect();
    assert_eq!(voices, vec!["hello", "bonjour"]);
}

#[test]
fn test_empty_collection_is_satisfiable() {
    let scope = Scope::builder().register(chorus()).build().unwrap();
    assert!(scope.resolve::<Chorus>().unwrap().voices.is_empty());
}

#[test]
fn test_prototype_creates_fresh_instances() {
    let scope = Scope::builder()
        .register(Registration::<Ticket>::prototype().with_default())
        .build()
        .unwrap();

    let a = scope.new_instance::<Ticket>().unwrap();
    let b = scope.new_instance::<Ticket>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    assert!(matches!(
        scope.resolve::<Ticket>(),
        Err(ScopeError::PrototypeViaResolve(_))
    ));
    assert!(scope.can_new(TypeKey::of::<Ticket>()));
    assert!(!scope.can_resolve(TypeKey::of::<Ticket>()));
}

#[test]
fn test_new_on_singleton_fails() {
    let scope = Scope::builder().register(config()).build().unwrap();

    assert!(matches!(
        scope.new_instance::<Config>(),
        Err(ScopeError::SingletonViaNew(_))
    ));
    assert!(!scope.can_new(TypeKey::of::<Config>()));
}

#[test]
fn test_unregistered_type() {
    let scope = Scope::builder().build().unwrap();

    assert!(matches!(
        scope.resolve::<Config>(),
        Err(ScopeError::NotRegistered(_))
    ));
    assert!(matches!(
        scope.new_instance::<Ticket>(),
        Err(ScopeError::NoPrototype(_))
    ));
    assert!(!scope.can_new(TypeKey::of::<Ticket>()));
}

#[test]
fn test_prebuilt_instance() {
    let scope = Scope::builder()
        .register(Registration::instance(Config {
            name: "given".to_string(),
        }))
        .register(service())
        .build()
        .unwrap();

    assert_eq!(scope.resolve::<Service>().unwrap().config.name, "given");
}

#[test]
fn test_disabled_registration_is_skipped() {
    let scope = Scope::builder()
        .register(english())
        .register(french().enabled(false))
        .build()
        .unwrap();

    assert_eq!(scope.resolve::<dyn Greeter>().unwrap().greet(), "hello");
    assert!(scope.kind_of(TypeKey::of::<French>()).is_none());
}

#[test]
fn test_duplicate_registration() {
    let err = Scope::builder()
        .register(config())
        .register(config())
        .build()
        .unwrap_err();

    assert!(matches!(err, ScopeError::DuplicateRegistration(_)));
}

#[test]
fn test_same_type_cannot_be_both_kinds() {
    let err = Scope::builder()
        .register(Registration::<Ticket>::singleton().constructor(vec![], |_| Ok(Ticket)))
        .register(Registration::<Ticket>::prototype().constructor(vec![], |_| Ok(Ticket)))
        .build()
        .unwrap_err();

    assert!(matches!(err, ScopeError::DuplicateRegistration(_)));
}

#[test]
fn test_greedy_constructor_selection() {
    let flexible = || {
        Registration::<Service>::singleton()
            .constructor(vec![], |_| {
                Ok(Service {
                    config: Arc::new(Config {
                        name: "fallback".to_string(),
                    }),
                })
            })
            .constructor(vec![Param::one::<Config>()], |args| {
                Ok(Service {
                    config: args.one::<Config>()?,
                })
            })
    };

    let scope = Scope::builder()
        .register(flexible())
        .register(config())
        .build()
        .unwrap();
    assert_eq!(scope.resolve::<Service>().unwrap().config.name, "main");

    let scope = Scope::builder().register(flexible()).build().unwrap();
    assert_eq!(scope.resolve::<Service>().unwrap().config.name, "fallback");
}

#[test]
fn test_unsatisfiable_report_marks_missing() {
    let err = Scope::builder().register(service()).build().unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, ScopeError::UnsatisfiableConstructor { .. }));
    assert!(message.contains("Found 1 constructor(s):"));
    assert!(message.contains("new(Config)"));
    assert!(message.contains("[MISSING] Config"));
}

#[test]
fn test_unsatisfiable_report_marks_ambiguous() {
    struct Host;

    let err = Scope::builder()
        .register(english())
        .register(french())
        .register(
            Registration::<Host>::singleton()
                .constructor(vec![Param::one::<dyn Greeter>()], |args| {
                    args.one::<dyn Greeter>()?;
                    Ok(Host)
                }),
        )
        .build()
        .unwrap_err();

    assert!(err.to_string().contains("[AMBIGUOUS] dyn Greeter"));
}

#[test]
fn test_singleton_cannot_depend_on_prototype() {
    struct Holder;

    let err = Scope::builder()
        .register(Registration::<Ticket>::prototype().with_default())
        .register(
            Registration::<Holder>::singleton()
                .constructor(vec![Param::one::<Ticket>()], |_| Ok(Holder)),
        )
        .build()
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("[PROTOTYPE] Ticket"));
    assert!(message.contains("new_instance()"));
}

#[test]
fn test_prototype_in_collection_is_rejected() {
    let err = Scope::builder()
        .register(chorus())
        .register(english())
        .register(
            Registration::<French>::prototype()
                .implements::<dyn Greeter, _>(|f: Arc<French>| -> Arc<dyn Greeter> { f })
                .constructor(vec![], |_| Ok(French)),
        )
        .build()
        .unwrap_err();

    match err {
        ScopeError::PrototypeInCollection {
            prototype,
            collection,
            owner,
        } => {
            assert_eq!(prototype, "French");
            assert_eq!(collection, "Vec<dyn Greeter>");
            assert_eq!(owner, "Chorus");
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct Anchor;
struct CycleA;
struct CycleB;

#[test]
fn test_cycle_path_is_trimmed() {
    let err = Scope::builder()
        .register(
            Registration::<Anchor>::singleton()
                .constructor(vec![Param::one::<CycleA>()], |_| Ok(Anchor)),
        )
        .register(
            Registration::<CycleA>::singleton()
                .constructor(vec![Param::one::<CycleB>()], |_| Ok(CycleA)),
        )
        .register(
            Registration::<CycleB>::singleton()
                .constructor(vec![Param::one::<CycleA>()], |_| Ok(CycleB)),
        )
        .build()
        .unwrap_err();

    match &err {
        ScopeError::CircularDependency { path } => {
            assert_eq!(path, &vec!["CycleA", "CycleB", "CycleA"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "Circular dependency: CycleA → CycleB → CycleA");
}

#[test]
fn test_construct_unregistered_type() {
    #[derive(Debug)]
    struct Report {
        name: String,
        singletons: usize,
    }

    let scope = Scope::builder().register(config()).build().unwrap();

    let report = Registration::<Report>::prototype().constructor(
        vec![Param::Scope, Param::one::<Config>()],
        |args| {
            let scope = args.scope()?;
            let config = args.one::<Config>()?;
            Ok(Report {
                name: config.name.clone(),
                singletons: scope.singleton_types().len(),
            })
        },
    );

    assert!(scope.can_construct(&report));
    let report = scope.construct(report).unwrap();
    assert_eq!(report.name, "main");
    assert_eq!(report.singletons, 1);

    assert!(matches!(
        scope.construct(config()),
        Err(ScopeError::SingletonViaNew(_))
    ));
}

#[test]
fn test_constructor_error_is_wrapped() {
    struct Broken;

    let scope = Scope::builder()
        .register(
            Registration::<Broken>::singleton()
                .constructor(vec![], |_| Err(anyhow::anyhow!("disk on fire"))),
        )
        .build()
        .unwrap();

    match scope.resolve::<Broken>() {
        Err(ScopeError::Construction { ty, source }) => {
            assert_eq!(ty, "Broken");
            assert_eq!(source.to_string(), "disk on fire");
        }
        _ => panic!("expected construction error"),
    }
}

#[test]
fn test_type_queries() {
    let scope = Scope::builder()
        .register(english().display_name("English greeter"))
        .register(french())
        .register(Registration::<Ticket>::prototype().with_default())
        .build()
        .unwrap();

    assert_eq!(scope.kind_of(TypeKey::of::<English>()), Some(Kind::Singleton));
    assert_eq!(scope.kind_of(TypeKey::of::<Ticket>()), Some(Kind::Prototype));
    assert!(scope.is_assignable(TypeKey::of::<English>(), TypeKey::of::<dyn Greeter>()));
    assert!(scope.is_assignable(TypeKey::of::<English>(), TypeKey::of::<Phrase>()));
    assert!(!scope.is_assignable(TypeKey::of::<Ticket>(), TypeKey::of::<dyn Greeter>()));
    assert_eq!(
        scope.display_name(TypeKey::of::<English>()).as_deref(),
        Some("English greeter")
    );
    assert_eq!(scope.display_name(TypeKey::of::<French>()).as_deref(), Some("French"));
    assert_eq!(scope.singleton_types().len(), 2);
    assert_eq!(scope.prototype_types(), vec![TypeKey::of::<Ticket>()]);
    assert_eq!(
        scope.prototype_type_of(TypeKey::of::<Ticket>()).unwrap(),
        TypeKey::of::<Ticket>()
    );
}

// === Factories ===

struct LoudFactory;

impl Factory for LoudFactory {
    fn target(&self) -> TypeKey {
        TypeKey::of::<dyn Greeter>()
    }

    fn create(&self, _scope: &Scope, concrete: TypeKey) -> anyhow::Result<Erased> {
        if concrete == TypeKey::of::<English>() {
            return Ok(Arc::new(English {
                word: "HELLO".to_string(),
            }));
        }
        if concrete == TypeKey::of::<French>() {
            return Ok(Arc::new(French));
        }
        anyhow::bail!("cannot build {concrete}")
    }
}

struct PhraseFactory;

impl Factory for PhraseFactory {
    fn target(&self) -> TypeKey {
        TypeKey::of::<Phrase>()
    }

    fn create(&self, _scope: &Scope, _concrete: TypeKey) -> anyhow::Result<Erased> {
        Ok(Arc::new(English {
            word: "phrase".to_string(),
        }))
    }
}

struct QuietFactory;

impl Factory for QuietFactory {
    fn target(&self) -> TypeKey {
        TypeKey::of::<dyn Greeter>()
    }

    fn create(&self, _scope: &Scope, _concrete: TypeKey) -> anyhow::Result<Erased> {
        Ok(Arc::new(French))
    }
}

fn factory<F: Factory + 'static>(value: F) -> Registration<F> {
    Registration::instance(value)
        .implements::<dyn Factory, _>(|f: Arc<F>| -> Arc<dyn Factory> { f })
}

#[test]
fn test_factory_overrides_constructor() {
    let scope = Scope::builder()
        .register(english())
        .register(factory(LoudFactory))
        .build()
        .unwrap();

    assert_eq!(scope.resolve::<dyn Greeter>().unwrap().greet(), "HELLO");
    assert_eq!(
        scope.factory_of(TypeKey::of::<English>()),
        Some(TypeKey::of::<LoudFactory>())
    );
    assert_eq!(scope.factories(), vec![TypeKey::of::<LoudFactory>()]);
}

#[test]
fn test_closest_factory_wins() {
    let scope = Scope::builder()
        .register(english())
        .register(french())
        .register(factory(LoudFactory))
        .register(factory(PhraseFactory))
        .build()
        .unwrap();

    assert_eq!(
        scope.factory_of(TypeKey::of::<English>()),
        Some(TypeKey::of::<PhraseFactory>())
    );
    assert_eq!(
        scope.factory_of(TypeKey::of::<French>()),
        Some(TypeKey::of::<LoudFactory>())
    );
    assert_eq!(scope.resolve::<English>().unwrap().word, "phrase");
}

#[test]
fn test_factory_tie_fails_build() {
    let err = ScopeBuilder::new()
        .register(english())
        .register(factory(LoudFactory))
        .register(factory(QuietFactory))
        .build()
        .unwrap_err();

    match err {
        ScopeError::AmbiguousFactory { ty, factories } => {
            assert_eq!(ty, "English");
            assert_eq!(factories.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_factory_serves_prototypes() {
    let scope = Scope::builder()
        .register(
            Registration::<English>::prototype()
                .implements::<dyn Greeter, _>(|e: Arc<English>| -> Arc<dyn Greeter> { e })
                .constructor(vec![], |_| {
                    Ok(English {
                        word: "hello".to_string(),
                    })
                }),
        )
        .register(factory(LoudFactory))
        .build()
        .unwrap();

    let a = scope.new_instance::<English>().unwrap();
    let b = scope.new_instance::<English>().unwrap();
    assert_eq!(a.word, "HELLO");
    assert!(!Arc::ptr_eq(&a, &b));
}
