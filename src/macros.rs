/// Binds a model to a store collection.
///
/// # Syntax
/// ```ignore
/// collection!("collection_name": Model = id_field);
/// ```
///
/// Implements [crate::model::Entity] and the typed table methods `find`, `list`, `first`,
/// `create`, `update` and `delete`. Store failures come back as [crate::service::EngineError].
///
/// # Example
///
/// ```ignore
/// collection!("videos": Video = id);
///
/// let video = Video::find(&store, &video_id).await?;
/// let (videos, total) = Video::list(&store, &[Filter::newest_first()], 12).await?;
/// ```
#[macro_export]
macro_rules! collection {
    ($collection:literal: $model:ty = $id:ident) => {
        impl $crate::model::Entity for $model {
            fn collection() -> &'static str {
                $collection
            }

            fn key(&self) -> &str {
                self.$id.as_str()
            }
        }

        impl $model {
            pub async fn find<S: $crate::store::DocumentStore>(
                store: &S, id: &$crate::model::Record<$model>,
            ) -> Result<Self, $crate::service::EngineError> {
                let document = store.get($collection, id.as_str()).await?;
                $crate::model::decode(&document)
            }

            pub async fn list<S: $crate::store::DocumentStore>(
                store: &S, filters: &[$crate::store::Filter], limit: u32,
            ) -> Result<(Vec<Self>, u64), $crate::service::EngineError> {
                let page = store.list($collection, filters, limit).await?;
                let items = page
                    .documents
                    .iter()
                    .map($crate::model::decode)
                    .collect::<Result<Vec<Self>, _>>()?;
                Ok((items, page.total))
            }

            pub async fn first<S: $crate::store::DocumentStore>(
                store: &S, filters: &[$crate::store::Filter],
            ) -> Result<Option<Self>, $crate::service::EngineError> {
                let (mut items, _) = Self::list(store, filters, 1).await?;
                Ok(items.pop())
            }

            pub async fn create<S: $crate::store::DocumentStore>(
                store: &S, id: $crate::store::DocumentId, draft: &impl ::serde::Serialize,
                acl: $crate::store::Acl,
            ) -> Result<Self, $crate::service::EngineError> {
                let fields = $crate::model::fields_of($collection, draft)?;
                let document = store.create($collection, id, fields, acl).await?;
                $crate::model::decode(&document)
            }

            pub async fn update<S: $crate::store::DocumentStore>(
                store: &S, id: &$crate::model::Record<$model>, fields: $crate::store::Fields,
            ) -> Result<Self, $crate::service::EngineError> {
                let document = store.update($collection, id.as_str(), fields).await?;
                $crate::model::decode(&document)
            }

            pub async fn delete<S: $crate::store::DocumentStore>(
                store: &S, id: &$crate::model::Record<$model>,
            ) -> Result<(), $crate::service::EngineError> {
                store.delete($collection, id.as_str()).await?;
                Ok(())
            }
        }
    };
}
